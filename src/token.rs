//! Token minting.
//!
//! Reference scheme from the original service: the host of a room gets
//! `"host_<ip>"`; each subsequent guest gets `"guest_<ip>_<n>"` where `n` is
//! the room's member count at join time. This is preserved verbatim per
//! spec.md §9 — it is not redesigned even though two joins from the same IP
//! racing the registry mutex could only collide if the room's member count
//! did not advance between them, which the mutex already prevents.

use std::net::IpAddr;

pub fn host_token(ip: IpAddr) -> Vec<u8> {
    format!("host_{ip}").into_bytes()
}

pub fn guest_token(ip: IpAddr, member_count_at_join: usize) -> Vec<u8> {
    format!("guest_{ip}_{member_count_at_join}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_token_format() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(host_token(ip), b"host_10.0.0.1".to_vec());
    }

    #[test]
    fn guest_token_format() {
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(guest_token(ip, 1), b"guest_10.0.0.2_1".to_vec());
    }

    #[test]
    fn guest_tokens_differ_by_member_count() {
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert_ne!(guest_token(ip, 1), guest_token(ip, 2));
    }
}
