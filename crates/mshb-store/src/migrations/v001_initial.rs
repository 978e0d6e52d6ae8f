//! v001 -- Initial schema creation.
//!
//! Identity (`profiles`, `auth_users`), social graph (`friendships`),
//! conversations (`dm_threads`, `group_threads`, `messages`, ...), servers
//! and their channels, voice presence and read markers.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Identity
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id            TEXT PRIMARY KEY NOT NULL,          -- UUID v4
    username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name  TEXT,
    avatar_url    TEXT,
    banner_url    TEXT,
    status        TEXT NOT NULL DEFAULT 'online',
    custom_status TEXT,
    language      TEXT NOT NULL DEFAULT 'en',
    last_seen     TEXT,
    created_at    TEXT NOT NULL                       -- RFC 3339, microseconds, UTC
);

CREATE TABLE IF NOT EXISTS auth_users (
    id            TEXT PRIMARY KEY NOT NULL,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,                      -- argon2 PHC string
    created_at    TEXT NOT NULL,

    FOREIGN KEY (id) REFERENCES profiles(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Friends
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    id           TEXT PRIMARY KEY NOT NULL,
    requester_id TEXT NOT NULL,
    addressee_id TEXT NOT NULL,
    status       TEXT NOT NULL,                       -- pending | accepted
    created_at   TEXT NOT NULL,

    UNIQUE (requester_id, addressee_id),
    FOREIGN KEY (requester_id) REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (addressee_id) REFERENCES profiles(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS dm_threads (
    id         TEXT PRIMARY KEY NOT NULL,
    user1_id   TEXT NOT NULL,                         -- user1_id < user2_id
    user2_id   TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (user1_id, user2_id),
    FOREIGN KEY (user1_id) REFERENCES profiles(id) ON DELETE CASCADE,
    FOREIGN KEY (user2_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS group_threads (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    icon_url   TEXT,
    owner_id   TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,                          -- admin | member
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES group_threads(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Servers (guilds)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS servers (
    id                    TEXT PRIMARY KEY NOT NULL,
    name                  TEXT NOT NULL,
    owner_id              TEXT NOT NULL,
    icon_url              TEXT,
    banner_url            TEXT,
    tag                   TEXT,
    badge                 TEXT,
    color                 TEXT,
    default_notifications TEXT NOT NULL DEFAULT 'all',   -- all | mentions | none
    system_channel_id     TEXT,
    created_at            TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES profiles(id)
);

CREATE TABLE IF NOT EXISTS server_members (
    server_id TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,                          -- owner | admin | member
    joined_at TEXT NOT NULL,

    PRIMARY KEY (server_id, user_id),
    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channels (
    id         TEXT PRIMARY KEY NOT NULL,
    server_id  TEXT NOT NULL,
    name       TEXT NOT NULL,
    kind       TEXT NOT NULL,                         -- text | voice
    position   INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_channels_server ON channels(server_id, position);

CREATE TABLE IF NOT EXISTS server_invites (
    code       TEXT PRIMARY KEY NOT NULL,
    server_id  TEXT NOT NULL,
    created_by TEXT NOT NULL,
    max_uses   INTEGER,                               -- NULL = unlimited
    uses       INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT,                                  -- NULL = never
    created_at TEXT NOT NULL,

    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS server_assets (
    id          TEXT PRIMARY KEY NOT NULL,
    server_id   TEXT NOT NULL,
    kind        TEXT NOT NULL,                        -- emoji | sticker | sound
    name        TEXT NOT NULL,
    url         TEXT NOT NULL,
    uploaded_by TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    UNIQUE (server_id, kind, name),
    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                   TEXT PRIMARY KEY NOT NULL,
    dm_thread_id         TEXT,
    group_thread_id      TEXT,
    channel_id           TEXT,
    author_id            TEXT NOT NULL,
    content              TEXT NOT NULL DEFAULT '',
    file_url             TEXT,
    file_name            TEXT,
    file_type            TEXT,
    file_size            INTEGER,
    edited_at            TEXT,
    deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL,

    CHECK ((dm_thread_id IS NOT NULL)
         + (group_thread_id IS NOT NULL)
         + (channel_id IS NOT NULL) = 1),
    FOREIGN KEY (dm_thread_id) REFERENCES dm_threads(id) ON DELETE CASCADE,
    FOREIGN KEY (group_thread_id) REFERENCES group_threads(id) ON DELETE CASCADE,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_dm ON messages(dm_thread_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(group_thread_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel_id, created_at);

CREATE TABLE IF NOT EXISTS message_hidden (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Voice presence and read markers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS voice_participants (
    id         TEXT PRIMARY KEY NOT NULL,
    channel_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    is_muted   INTEGER NOT NULL DEFAULT 0,
    joined_at  TEXT NOT NULL,

    UNIQUE (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS thread_read_status (
    user_id      TEXT NOT NULL,
    thread_id    TEXT NOT NULL,                       -- dm or group thread id
    last_read_at TEXT NOT NULL,

    PRIMARY KEY (user_id, thread_id)
);

CREATE TABLE IF NOT EXISTS channel_read_status (
    user_id      TEXT NOT NULL,
    channel_id   TEXT NOT NULL,
    last_read_at TEXT NOT NULL,

    PRIMARY KEY (user_id, channel_id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
