//! Object, command and signal numbers shared by clients and the server.

/// Version carried in the HELLO handshake.
pub const PROTOCOL_VERSION: i64 = 1;

pub mod object {
    pub const MAIN: u32 = 0;
    pub const SIGNAL: u32 = 1;
    pub const COURIER: u32 = 2;
    pub const IPC_MANAGER: u32 = 3;
}

/// Commands valid on every object.
pub mod command {
    pub const REPLY: u32 = 0;
    pub const ERROR: u32 = 1;
    /// First object-specific command number.
    pub const FIRST: u32 = 32;
}

pub mod main {
    pub const HELLO: u32 = super::command::FIRST;
}

/// Commands on the signal pseudo-object. Deliveries reuse SIGNAL/BROADCAST.
pub mod signal_cmd {
    pub const SIGNAL: u32 = super::command::FIRST;
    pub const BROADCAST: u32 = super::command::FIRST + 1;
    pub const UNREGISTER: u32 = super::command::FIRST + 2;
}

pub mod courier {
    pub const SEND_MESSAGE: u32 = super::command::FIRST;
    pub const REPLY: u32 = super::command::FIRST + 1;
    pub const GET_CONNECTED_CLIENTS: u32 = super::command::FIRST + 2;
    pub const READY: u32 = super::command::FIRST + 3;
    pub const GET_READY_CLIENTS: u32 = super::command::FIRST + 4;
}

/// Signal and broadcast ids emitted by the runtime itself.
pub mod signal {
    pub const COURIER_MESSAGE: u32 = 0;
    pub const COURIER_READY: u32 = 1;
    pub const CLIENT_CONNECTED: u32 = 2;
    pub const CLIENT_DISCONNECTED: u32 = 3;
    /// First id free for applications.
    pub const USER_START: u32 = 64;
}
