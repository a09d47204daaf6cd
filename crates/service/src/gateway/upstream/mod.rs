#[cfg(test)]
pub(crate) mod mock_transport;
pub(crate) mod race;
pub(crate) mod transport;
