//! Playback mixing for a mesh call.
//!
//! Every remote participant arrives as its own stream; the speaker only
//! gets one. [`PlaybackMixer`] buffers per user and [`mix_frames`] folds
//! the buffered frames together.

use std::collections::{HashMap, VecDeque};

use mshb_shared::types::UserId;

/// Mix multiple audio frames (f32 samples) into a single output frame.
/// Uses additive mixing scaled by 1/sqrt(n), then hard clipping.
pub fn mix_frames(frames: &[Vec<f32>]) -> Vec<f32> {
    if frames.is_empty() {
        return Vec::new();
    }

    let max_len = frames.iter().map(|f| f.len()).max().unwrap_or(0);
    let mut output = vec![0.0f32; max_len];
    let num_sources = frames.len() as f32;

    for frame in frames {
        for (i, &sample) in frame.iter().enumerate() {
            output[i] += sample;
        }
    }

    if num_sources > 1.0 {
        let scale = 1.0 / num_sources.sqrt();
        for sample in &mut output {
            *sample *= scale;
        }
    }

    for sample in &mut output {
        *sample = sample.clamp(-1.0, 1.0);
    }

    output
}

/// Per-user jitter buffers feeding one output.
pub struct PlaybackMixer {
    frame_size: usize,
    /// Upper bound per user; older samples are dropped past it.
    max_buffered: usize,
    buffers: HashMap<UserId, VecDeque<f32>>,
}

impl PlaybackMixer {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            max_buffered: frame_size * 10,
            buffers: HashMap::new(),
        }
    }

    pub fn push(&mut self, user_id: UserId, samples: &[f32]) {
        let buffer = self.buffers.entry(user_id).or_default();
        buffer.extend(samples.iter().copied());
        let excess = buffer.len().saturating_sub(self.max_buffered);
        if excess > 0 {
            buffer.drain(..excess);
        }
    }

    pub fn remove(&mut self, user_id: &UserId) {
        self.buffers.remove(user_id);
    }

    pub fn sources(&self) -> usize {
        self.buffers.len()
    }

    /// Take one frame from every user with a full frame buffered and mix
    /// them. `None` while nobody has a full frame.
    pub fn next_frame(&mut self) -> Option<Vec<f32>> {
        let frame_size = self.frame_size;
        let frames: Vec<Vec<f32>> = self
            .buffers
            .values_mut()
            .filter(|b| b.len() >= frame_size)
            .map(|b| b.drain(..frame_size).collect())
            .collect();

        if frames.is_empty() {
            None
        } else {
            Some(mix_frames(&frames))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_empty() {
        let result = mix_frames(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_mix_single_frame() {
        let frame = vec![0.5, -0.5, 0.25];
        let result = mix_frames(&[frame.clone()]);
        assert_eq!(result, frame);
    }

    #[test]
    fn test_mix_two_frames() {
        let result = mix_frames(&[vec![0.5, 0.3], vec![0.3, 0.2]]);
        let scale = 1.0 / 2.0f32.sqrt();
        assert!((result[0] - 0.8 * scale).abs() < 0.001);
        assert!((result[1] - 0.5 * scale).abs() < 0.001);
    }

    #[test]
    fn test_mix_clipping_prevention() {
        let result = mix_frames(&[vec![1.0, 1.0], vec![1.0, 1.0]]);
        for &sample in &result {
            assert!((-1.0..=1.0).contains(&sample));
        }
    }

    #[test]
    fn test_mix_different_lengths() {
        let result = mix_frames(&[vec![0.5, 0.3, 0.1], vec![0.3, 0.2]]);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn mixer_waits_for_full_frames() {
        let mut mixer = PlaybackMixer::new(4);
        let alice = UserId::new();
        let bob = UserId::new();

        mixer.push(alice, &[0.1, 0.1]);
        assert!(mixer.next_frame().is_none());

        mixer.push(alice, &[0.1, 0.1]);
        mixer.push(bob, &[0.2; 4]);
        let frame = mixer.next_frame().unwrap();
        assert_eq!(frame.len(), 4);
        let expected = 0.3 / 2.0f32.sqrt();
        assert!((frame[0] - expected).abs() < 0.001);

        assert!(mixer.next_frame().is_none());
        assert_eq!(mixer.sources(), 2);
        mixer.remove(&bob);
        assert_eq!(mixer.sources(), 1);
    }

    #[test]
    fn mixer_bounds_buffering() {
        let mut mixer = PlaybackMixer::new(2);
        let alice = UserId::new();
        mixer.push(alice, &[0.5; 100]);

        let mut frames = 0;
        while mixer.next_frame().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 10);
    }
}
