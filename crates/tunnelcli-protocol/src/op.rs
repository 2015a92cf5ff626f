//! Operation codes carried in the frame header.

use std::fmt;

/// One-byte operation sent to the other side.
///
/// The discriminant is the wire encoding. The set is versioned as a whole:
/// a reader skips codes it does not know instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// UTF-8 command name or argument.
    Arg = 0,
    /// UTF-8 locale identifier.
    Locale = 1,
    /// UTF-8 client encoding.
    Encoding = 2,
    /// Start running the command.
    Start = 3,
    /// Exit code, as a big-endian `i32`.
    Exit = 4,
    /// Chunk of stdin.
    Stdin = 5,
    /// EOF on stdin.
    EndStdin = 6,
    /// Chunk of stdout.
    Stdout = 7,
    /// Chunk of stderr.
    Stderr = 8,
}

impl Op {
    /// Every known operation, in wire order.
    pub const ALL: [Op; 9] = [
        Op::Arg,
        Op::Locale,
        Op::Encoding,
        Op::Start,
        Op::Exit,
        Op::Stdin,
        Op::EndStdin,
        Op::Stdout,
        Op::Stderr,
    ];

    /// Number of known operation codes.
    pub const COUNT: u8 = Self::ALL.len() as u8;

    /// Decodes a wire code; `None` for codes this version does not know.
    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True if the client sends this operation to the server.
    pub fn is_client_side(self) -> bool {
        matches!(
            self,
            Op::Arg | Op::Locale | Op::Encoding | Op::Start | Op::Stdin | Op::EndStdin
        )
    }

    /// Upper-case protocol name, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Op::Arg => "ARG",
            Op::Locale => "LOCALE",
            Op::Encoding => "ENCODING",
            Op::Start => "START",
            Op::Exit => "EXIT",
            Op::Stdin => "STDIN",
            Op::EndStdin => "END_STDIN",
            Op::Stdout => "STDOUT",
            Op::Stderr => "STDERR",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_ordinals() {
        let codes: Vec<(u8, &str)> = Op::ALL.iter().map(|op| (op.code(), op.name())).collect();
        assert_eq!(
            codes,
            vec![
                (0, "ARG"),
                (1, "LOCALE"),
                (2, "ENCODING"),
                (3, "START"),
                (4, "EXIT"),
                (5, "STDIN"),
                (6, "END_STDIN"),
                (7, "STDOUT"),
                (8, "STDERR"),
            ]
        );
    }

    #[test]
    fn from_u8_round_trips_and_rejects_unknown() {
        for op in Op::ALL {
            assert_eq!(Op::from_u8(op.code()), Some(op));
        }
        assert_eq!(Op::from_u8(Op::COUNT), None);
        assert_eq!(Op::from_u8(200), None);
    }

    #[test]
    fn direction_split() {
        let server_bound: Vec<Op> = Op::ALL.into_iter().filter(|op| op.is_client_side()).collect();
        assert_eq!(
            server_bound,
            vec![
                Op::Arg,
                Op::Locale,
                Op::Encoding,
                Op::Start,
                Op::Stdin,
                Op::EndStdin
            ]
        );
        assert!(!Op::Exit.is_client_side());
        assert!(!Op::Stdout.is_client_side());
        assert!(!Op::Stderr.is_client_side());
    }
}
