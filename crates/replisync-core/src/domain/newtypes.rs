//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow through the
//! synchronization engine. Each newtype ensures data validity at
//! construction time, so an `EntityKey` that exists is always fully resolved.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Upper bound on the length of any server-issued identifier
const MAX_ID_LEN: usize = 512;

/// Checks the shared rules for server-issued opaque identifiers
///
/// Identifiers are opaque (usually base64-like), so only emptiness, length,
/// whitespace and control characters are rejected.
fn check_opaque_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("cannot be empty".to_string());
    }
    if id.len() > MAX_ID_LEN {
        return Err(format!("exceeds {MAX_ID_LEN} bytes"));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("contains whitespace or control characters: {id:?}"));
    }
    Ok(())
}

// ============================================================================
// StreamId
// ============================================================================

/// Identifier of one independently-synchronized logical stream
///
/// A stream is either a whole volume or a single share; each owns its own
/// cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Create a new StreamId
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long, or contains whitespace
    pub fn new(id: String) -> Result<Self, DomainError> {
        check_opaque_id(&id).map_err(DomainError::InvalidStreamId)?;
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for StreamId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

// ============================================================================
// ContainerId
// ============================================================================

/// Identifier of the container (share) that scopes entity identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a new ContainerId
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long, or contains whitespace
    pub fn new(id: String) -> Result<Self, DomainError> {
        check_opaque_id(&id).map_err(DomainError::InvalidContainerId)?;
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContainerId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

// ============================================================================
// LocalId
// ============================================================================

/// Identifier of an entity, unique only within its container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalId(String);

impl LocalId {
    /// Create a new LocalId
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long, or contains whitespace
    pub fn new(id: String) -> Result<Self, DomainError> {
        check_opaque_id(&id).map_err(DomainError::InvalidLocalId)?;
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LocalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for LocalId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<LocalId> for String {
    fn from(id: LocalId) -> Self {
        id.0
    }
}

// ============================================================================
// CursorToken
// ============================================================================

/// Opaque change-feed cursor issued by the server
///
/// The engine never interprets the token; it is persisted after a batch
/// succeeds and handed back to the event source on the next fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CursorToken(String);

impl CursorToken {
    /// Create a new CursorToken
    ///
    /// # Errors
    /// Returns error if the token is empty, too long, or contains whitespace
    pub fn new(token: String) -> Result<Self, DomainError> {
        check_opaque_id(&token).map_err(DomainError::InvalidCursor)?;
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CursorToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CursorToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<CursorToken> for String {
    fn from(token: CursorToken) -> Self {
        token.0
    }
}

// ============================================================================
// BatchId
// ============================================================================

/// Correlation identifier assigned to every batch the engine processes
///
/// Only used to tie together log lines and apply-unit scopes; it never
/// leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Create a new random BatchId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid BatchId: {e}")))
    }
}

// ============================================================================
// EntityKey
// ============================================================================

/// Fully resolved identity of a replicated entity
///
/// Entity identifiers are only unique inside a container, so the key always
/// carries both halves. There is no way to build a key with an implicit
/// container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    container_id: ContainerId,
    local_id: LocalId,
}

impl EntityKey {
    /// Create a key from its two resolved halves
    #[must_use]
    pub fn new(container_id: ContainerId, local_id: LocalId) -> Self {
        Self {
            container_id,
            local_id,
        }
    }

    /// The container that scopes this entity
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// The container-local entity identifier
    #[must_use]
    pub fn local_id(&self) -> &LocalId {
        &self.local_id
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.local_id)
    }
}
