use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Owner sentinel for system-owned claims that no player budget is charged
/// for.
pub const SERVER_OWNER: &str = "@server";

/// Identity a claim's quota is charged against: a player id, or the
/// reserved server owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn server() -> Self {
        Self(SERVER_OWNER.to_string())
    }

    pub fn is_server(&self) -> bool {
        self.0 == SERVER_OWNER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claim category. Each type draws from its own independently configured
/// quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimType {
    Player,
    AlwaysOn,
    Admin,
}

impl ClaimType {
    pub const ALL: [ClaimType; 3] = [ClaimType::Player, ClaimType::AlwaysOn, ClaimType::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Player => "player",
            ClaimType::AlwaysOn => "always-on",
            ClaimType::Admin => "admin",
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "player" => Ok(ClaimType::Player),
            "always-on" => Ok(ClaimType::AlwaysOn),
            "admin" => Ok(ClaimType::Admin),
            other => Err(format!("unknown claim type: {}", other)),
        }
    }
}

/// Chunk coordinates within a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// One persistent chunk-loading claim.
///
/// Claims are partitioned by `server_name`: a claim owned by one logical
/// server instance is never activated by another, even when both share a
/// store. `loadable` tracks activation eligibility and is flipped by the
/// balancing engine when an owner's quota shrinks below current usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub owner: OwnerId,
    pub server_name: String,
    pub world_id: String,
    pub position: ChunkPos,
    pub claim_type: ClaimType,
    pub loadable: bool,
    pub created_at: DateTime<Utc>,
}
