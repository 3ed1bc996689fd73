mod error;

pub use error::{err, Error, Result};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// A store is a single, coherent set of replica nodes living in one
// process. Each node has a unique NodeId, assigned densely from zero
// at manager construction and stable for the life of the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// How writes fan out across the nodes. Full broadcasts every write to
// every alive node; Consistent places each key on a ring-selected
// subset. The choice is per-manager and switchable at runtime, but
// switching never moves data already placed under the old strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Full,
    Consistent,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Full => write!(f, "full"),
            Strategy::Consistent => write!(f, "consistent"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Strategy::Full),
            "consistent" => Ok(Strategy::Consistent),
            other => Err(err(format!("unknown replication strategy: {other}"))),
        }
    }
}
