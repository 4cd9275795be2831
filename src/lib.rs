use blake3::Hasher;

pub mod clock;
pub mod config;
pub mod cryptography;
pub mod error;
pub mod flows;
pub mod invite_manager;
pub mod invite_server;
pub mod notifier;
pub mod routes;
pub mod signed_link;
pub mod r#trait;

///hashes with blake3
pub fn hash_string(data: &str) -> String {
    let mut hasher = Hasher::new();
    let _ = hasher.update(data.as_bytes());
    hasher.finalize().to_string()
}
