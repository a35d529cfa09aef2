//! Room code allocation.
//!
//! A room code is four uppercase alphanumerics. The rendezvous address is a
//! fixed prefix followed by the code, so codes share one global namespace with
//! every other client of the service. Collisions are retried immediately with a
//! fresh code; transport failures are retried after a backoff.

use rand::Rng;
use std::time::Duration;

use super::SessionError;
use crate::signaling::{Registration, SignalingClient, SignalingError};
use crate::types::RoomCode;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LENGTH: usize = 4;

#[derive(Debug, Clone)]
pub struct RoomCodeAllocator {
    pub prefix: String,
    /// Upper bound on codes tried before giving up on collisions
    pub max_attempts: u32,
    /// How many transport failures are tolerated before surfacing the error
    pub max_network_retries: u32,
    pub collision_delay: Duration,
    pub network_backoff: Duration,
}

impl Default for RoomCodeAllocator {
    fn default() -> Self {
        Self {
            prefix: "CMG-".to_string(),
            max_attempts: 10,
            max_network_retries: 3,
            collision_delay: Duration::from_millis(100),
            network_backoff: Duration::from_secs(1),
        }
    }
}

/// A fresh random code
pub fn generate_code() -> RoomCode {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Accepts user input like " ab12 " as "AB12"
pub fn normalize_code(input: &str) -> RoomCode {
    input.trim().to_ascii_uppercase()
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

impl RoomCodeAllocator {
    pub fn full_address(&self, code: &str) -> String {
        format!("{}{}", self.prefix, code)
    }

    /// Claim an unused room code on the signaling service
    pub async fn allocate_and_bind(
        &self,
        signaling: &dyn SignalingClient,
    ) -> Result<(RoomCode, Registration), SessionError> {
        let mut collisions = 0u32;
        let mut network_failures = 0u32;

        loop {
            let code = generate_code();
            let address = self.full_address(&code);
            tracing::debug!("Trying to host as {}", address);

            match signaling.register(Some(&address)).await {
                Ok(registration) => {
                    tracing::info!("Hosting room {} ({})", code, registration.address);
                    return Ok((code, registration));
                }
                Err(SignalingError::UnavailableId(_)) => {
                    collisions += 1;
                    tracing::warn!(
                        "Room address {} taken ({}/{}), retrying",
                        address,
                        collisions,
                        self.max_attempts
                    );
                    if collisions >= self.max_attempts {
                        return Err(SessionError::RoomAllocationExhausted {
                            attempts: collisions,
                        });
                    }
                    tokio::time::sleep(self.collision_delay).await;
                }
                Err(e) => {
                    network_failures += 1;
                    if network_failures > self.max_network_retries {
                        tracing::error!("Giving up on room allocation: {}", e);
                        return Err(SessionError::Signaling(e));
                    }
                    tracing::warn!(
                        "Signaling error while hosting ({}), backing off {:?}",
                        e,
                        self.network_backoff
                    );
                    tokio::time::sleep(self.network_backoff).await;
                }
            }
        }
    }
}
