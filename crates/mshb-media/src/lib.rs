//! Voice for MSHB: per-peer signaling, the full mesh call engine and the
//! audio path around it.

pub mod audio;
pub mod call;
pub mod codec;
pub mod error;
pub mod mesh;
pub mod mixer;
pub mod signaling;
pub mod transport;
pub mod webrtc_peer;

pub use call::{CallEvent, CallHandle, MeshCall};
pub use error::{MediaError, Result};
pub use mesh::PeerInfo;
pub use transport::{PeerConnector, PeerEvent, PeerLink, PeerState};
