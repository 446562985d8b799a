pub mod callrecord;
pub mod directory;
pub mod event;
pub mod orchestrator;
pub mod registry;
pub mod routing;
pub mod store;

/// Stable identity of a party on the internal system (user id).
pub type PartyId = String;
/// Short dialable identifier, 3-5 digits.
pub type Extension = String;
/// Internally generated call identifier.
pub type CallId = String;
