//! Identity & validators. A `User` is the pair `(ip, port)` that
//! uniquely names a node: canonical string form `ip:port`, canonical
//! filename form `ip-port`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct User {
    pub ip: IpAddr,
    pub port: u16,
}

impl User {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Canonical filename form: colon replaced with dash (`data/<ip-port>/`).
    pub fn to_filename(self) -> String {
        format!("{}-{}", self.ip, self.port)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for User {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip_part, port_part) = s
            .rsplit_once(':')
            .ok_or_else(|| NodeError::InvalidUserId(s.to_owned()))?;
        let ip: IpAddr = ip_part
            .parse()
            .map_err(|_| NodeError::InvalidUserId(s.to_owned()))?;
        let port: u16 = port_part
            .parse()
            .map_err(|_| NodeError::InvalidUserId(s.to_owned()))?;
        if port == 0 {
            return Err(NodeError::InvalidUserId(s.to_owned()));
        }
        Ok(User { ip, port })
    }
}

impl serde::Serialize for User {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for User {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        User::from_str(&s).map_err(serde::de::Error::custom)
    }
}
