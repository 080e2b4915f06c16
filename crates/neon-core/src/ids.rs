use uuid::Uuid;

/// Generates a 128-bit opaque entity identifier.
///
/// Used for every persisted entity (projects, suites, cases, runs, results)
/// so identifiers carry no ordering or tenant information.
pub fn new_entity_id() -> String {
    Uuid::new_v4().to_string()
}
