//! A lease is the only thing the client passes to a provider factory
//! (spec §4.7 "Lease"): it names the channel and the specific key index
//! bound to this call, without exposing the secret value itself.

#[derive(Debug, Clone)]
pub struct Lease {
    pub channel_id: String,
    pub key_index: usize,
}
