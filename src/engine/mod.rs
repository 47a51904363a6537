//! Business core: ride lifecycle coordination, the per-ride match
//! supervisor, candidate matching, and driver-side operations.

pub mod drivers;
pub mod matching;
pub mod pricing;
pub mod rides;
pub mod supervisor;

use chrono::Utc;
use rand::Rng;

/// Opaque per-operation id propagated across services and logs,
/// e.g. `req_20251028T184523_a91f3c`.
pub fn generate_correlation_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let noise: [u8; 3] = rand::thread_rng().gen();
    format!(
        "req_{stamp}_{:02x}{:02x}{:02x}",
        noise[0], noise[1], noise[2]
    )
}

#[cfg(test)]
mod tests {
    use super::generate_correlation_id;

    #[test]
    fn correlation_ids_are_prefixed_and_unique() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), "req_".len() + 15 + 1 + 6);
        assert_ne!(a, b);
    }
}
