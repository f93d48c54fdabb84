pub mod address {
    pub const ADDRESS_SIZE: usize = 20;
    pub const ZERO_ADDRESS_BYTES: [u8; ADDRESS_SIZE] = [0u8; ADDRESS_SIZE];
}

pub mod hash {
    pub const HASH_SIZE: usize = 32;
}

pub mod signature {
    pub const SIGNATURE_SIZE: usize = 65;
    pub const R_SIZE: usize = 32;
    pub const S_SIZE: usize = 32;
    pub const V_SIZE: usize = 1;
}

pub mod queues {
    pub const KEYGEN: &str = "keygenQueue";
    pub const KEYGEN_CANCEL: &str = "cancelKeygenQueue";
    pub const SIGN: &str = "signQueue";
    pub const EXCHANGE: &str = "exchangeQueue";
    pub const EPOCH_TIME_INTERVALS: &str = "epochTimeIntervalsQueue";
    pub const RELAY: &str = "relayQueue";

    /// Suffix of the temporary queue used while filtering a queue on startup.
    pub const BACKUP_SUFFIX: &str = ".backup";
}

pub mod defaults {
    pub const MAX_FETCH_RANGE_SIZE: u64 = 10;
    pub const POLL_INTERVAL_MS: u64 = 2000;
    pub const RETRY_DELAY_MS: u64 = 1000;
    pub const HOME_TOKEN_DECIMALS: u32 = 18;
    pub const FOREIGN_DECIMALS: u32 = 8;
}
