// batteries on top of gpi-core/gpi-agents: concrete function approximation
// backends and the tasks the integration tests drive
pub mod backends;

#[cfg(feature = "test-utils")]
pub mod test_utils;
