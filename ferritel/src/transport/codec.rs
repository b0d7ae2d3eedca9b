//! Telnet (RFC 854) stream decoding.
//!
//! Legacy devices open a session with a burst of option negotiation.
//! The codec refuses every option, leaving both ends in plain NVT mode,
//! and hands back only the data bytes.

/// Interpret As Command.
pub const IAC: u8 = 255;
/// Refuse to perform an option.
pub const DONT: u8 = 254;
/// Request that the peer perform an option.
pub const DO: u8 = 253;
/// Refuse to enable an option.
pub const WONT: u8 = 252;
/// Offer to enable an option.
pub const WILL: u8 = 251;
/// Subnegotiation begin.
pub const SB: u8 = 250;
/// Subnegotiation end.
pub const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Incremental Telnet decoder.
///
/// Command sequences may be split across reads; the decoder keeps its
/// position between calls to [`decode`](Self::decode).
#[derive(Debug)]
pub struct TelnetCodec {
    state: State,
}

impl TelnetCodec {
    /// Create a decoder in the data state.
    pub fn new() -> Self {
        Self { state: State::Data }
    }

    /// Decode `input`, appending data bytes to `data` and negotiation
    /// replies to `replies`.
    pub fn decode(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match self.state {
                State::Data => match byte {
                    IAC => State::Iac,
                    // NUL padding after CR carries no data
                    0 => State::Data,
                    _ => {
                        data.push(byte);
                        State::Data
                    }
                },
                State::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Negotiate(byte),
                    SB => State::Subnegotiation,
                    // NOP, GA, AYT and friends
                    _ => State::Data,
                },
                State::Negotiate(command) => {
                    match command {
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        // DONT/WONT confirm the state we are already in
                        _ => {}
                    }
                    State::Data
                }
                State::Subnegotiation => match byte {
                    IAC => State::SubnegotiationIac,
                    _ => State::Subnegotiation,
                },
                State::SubnegotiationIac => match byte {
                    SE => State::Data,
                    _ => State::Subnegotiation,
                },
            };
        }
    }

    /// Escape outgoing data so a literal 0xFF is not read as a command.
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            if byte == IAC {
                out.push(IAC);
            }
            out.push(byte);
        }
        out
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self::new()
    }
}
