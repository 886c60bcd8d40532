//! Identity atoms.
//!
//! Id: 14 bytes, a SystemId (6) followed by an ObjectId (8).
//! The text form is lowercase hex; parsing is lenient: short input fills
//! the leading bytes, invalid hex yields the null id.

use std::fmt;

use rand::Rng;

pub const SYSTEM_ID_LEN: usize = 6;
pub const OBJECT_ID_LEN: usize = 8;
pub const ID_LEN: usize = SYSTEM_ID_LEN + OBJECT_ID_LEN;

/// Alphabet for request, session and event tokens.
const ALNUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a random alphanumeric token of the given length.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..ALNUM.len());
            ALNUM[idx] as char
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Lenient hex decode into a fixed buffer: short input fills the leading
/// bytes, trailing bytes stay zero. Anything non-hex yields all zeros.
fn from_hex(s: &str, buf: &mut [u8]) {
    let s = if s.len() % 2 == 1 { &s[..s.len() - 1] } else { s };
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        if i >= buf.len() {
            break;
        }
        let hex = match std::str::from_utf8(chunk) {
            Ok(h) => h,
            Err(_) => {
                buf.fill(0);
                return;
            }
        };
        match u8::from_str_radix(hex, 16) {
            Ok(b) => buf[i] = b,
            Err(_) => {
                buf.fill(0);
                return;
            }
        }
    }
}

macro_rules! id_type {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Random, non-null id.
            pub fn generate() -> Self {
                let mut bytes = [0u8; $len];
                rand::rng().fill(&mut bytes[..]);
                Self(bytes)
            }

            /// Lenient hex parse; see module docs.
            pub fn parse(s: &str) -> Self {
                let mut bytes = [0u8; $len];
                from_hex(s, &mut bytes);
                Self(bytes)
            }

            pub fn hex(&self) -> String {
                to_hex(&self.0)
            }

            pub fn is_null(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.hex())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name::parse(&s))
            }
        }
    };
}

id_type!(Id, ID_LEN);
id_type!(SystemId, SYSTEM_ID_LEN);
id_type!(ObjectId, OBJECT_ID_LEN);

impl Id {
    pub fn compose(system: SystemId, object: ObjectId) -> Self {
        let mut bytes = [0u8; ID_LEN];
        bytes[..SYSTEM_ID_LEN].copy_from_slice(system.as_bytes());
        bytes[SYSTEM_ID_LEN..].copy_from_slice(object.as_bytes());
        Self(bytes)
    }

    pub fn system(&self) -> SystemId {
        let mut bytes = [0u8; SYSTEM_ID_LEN];
        bytes.copy_from_slice(&self.0[..SYSTEM_ID_LEN]);
        SystemId::from_bytes(bytes)
    }

    pub fn object(&self) -> ObjectId {
        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes.copy_from_slice(&self.0[SYSTEM_ID_LEN..]);
        ObjectId::from_bytes(bytes)
    }

    pub fn decompose(&self) -> (SystemId, ObjectId) {
        (self.system(), self.object())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = Id::generate();
        assert_eq!(Id::parse(&id.hex()), id);
        assert_eq!(id.hex().len(), ID_LEN * 2);
    }

    #[test]
    fn compose_decompose() {
        let sys = SystemId::generate();
        let obj = ObjectId::generate();
        let id = Id::compose(sys, obj);
        assert_eq!(id.system(), sys);
        assert_eq!(id.object(), obj);
        assert_eq!(id.decompose(), (sys, obj));
    }

    #[test]
    fn lenient_parse() {
        // Short input fills the leading bytes.
        let id = SystemId::parse("ff00");
        assert_eq!(id.as_bytes()[0], 0xff);
        assert_eq!(id.as_bytes()[1], 0x00);
        assert_eq!(&id.as_bytes()[2..], &[0, 0, 0, 0]);

        // Invalid hex yields null.
        assert!(SystemId::parse("not-hex").is_null());
        assert!(SystemId::parse("").is_null());
    }

    #[test]
    fn null_detection() {
        assert!(Id::default().is_null());
        assert!(!Id::generate().is_null());
    }

    #[test]
    fn serde_as_hex_string() {
        let id = SystemId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.hex()));
        let back: SystemId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn tokens_are_alphanumeric() {
        let tok = random_token(8);
        assert_eq!(tok.len(), 8);
        assert!(tok.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
