//! Server configuration.

/// Configuration for the reference registry.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Prefix of assigned OIDs; a sequence number is appended.
    pub oid_prefix: String,
    /// First OID sequence number.
    pub first_oid: u64,
    /// First bulk transfer id.
    pub first_bulk_transfer_id: i64,
    /// Answer node and point reads with split `{"km", "m"}` addresses.
    pub split_addresses: bool,
    /// Whether the registry starts reachable.
    pub online: bool,
}

impl ServerConfig {
    /// Creates a configuration assigning OIDs under `oid_prefix`.
    pub fn new(oid_prefix: impl Into<String>) -> Self {
        Self {
            oid_prefix: oid_prefix.into(),
            first_oid: 1,
            first_bulk_transfer_id: 1,
            split_addresses: true,
            online: true,
        }
    }

    /// Sets the first OID sequence number.
    pub fn with_first_oid(mut self, first: u64) -> Self {
        self.first_oid = first;
        self
    }

    /// Sets the first bulk transfer id.
    pub fn with_first_bulk_transfer_id(mut self, first: i64) -> Self {
        self.first_bulk_transfer_id = first;
        self
    }

    /// Chooses between split and plain address encoding on reads.
    pub fn with_split_addresses(mut self, split: bool) -> Self {
        self.split_addresses = split;
        self
    }

    /// Sets whether the registry starts reachable.
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("1.2.246.578.1")
    }
}
