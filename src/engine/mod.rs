pub mod dedupe;
pub mod generator;
pub mod lsh;
pub mod minhash;
pub mod shingler;
