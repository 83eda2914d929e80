//! Match criteria for application-message correlators.

use crate::types::{Address, DataConfirm, IncomingMessage};

/// Fields a correlator can be matched on.
///
/// The same struct describes both a registration (what the correlator wants)
/// and a key (what an inbound message carries). Unset fields on a
/// registration are wildcards for partial matching; on a key they mean the
/// message did not carry that field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchCriteria {
    /// Remote node address.
    pub address: Option<Address>,
    /// Profile id.
    pub profile_id: Option<u16>,
    /// Cluster id.
    pub cluster_id: Option<u16>,
    /// Remote (sending) endpoint.
    pub src_endpoint: Option<u8>,
    /// Local (receiving) endpoint.
    pub dst_endpoint: Option<u8>,
    /// Sequence number.
    pub sequence: Option<u8>,
}

impl MatchCriteria {
    /// Creates empty criteria that match everything partially.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address: None,
            profile_id: None,
            cluster_id: None,
            src_endpoint: None,
            dst_endpoint: None,
            sequence: None,
        }
    }

    /// Sets the address.
    #[must_use]
    pub const fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the profile id.
    #[must_use]
    pub const fn profile(mut self, profile_id: u16) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    /// Sets the cluster id.
    #[must_use]
    pub const fn cluster(mut self, cluster_id: u16) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    /// Sets the sending endpoint.
    #[must_use]
    pub const fn src_endpoint(mut self, endpoint: u8) -> Self {
        self.src_endpoint = Some(endpoint);
        self
    }

    /// Sets the receiving endpoint.
    #[must_use]
    pub const fn dst_endpoint(mut self, endpoint: u8) -> Self {
        self.dst_endpoint = Some(endpoint);
        self
    }

    /// Sets the sequence number.
    #[must_use]
    pub const fn sequence(mut self, sequence: u8) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Key carried by an incoming application message.
    #[must_use]
    pub fn from_message(message: &IncomingMessage) -> Self {
        Self {
            address: Some(message.source),
            profile_id: message.profile_id,
            cluster_id: Some(message.cluster_id),
            src_endpoint: Some(message.src_endpoint),
            dst_endpoint: Some(message.dst_endpoint),
            sequence: message.sequence(),
        }
    }

    /// Key carried by a data confirm: local endpoint and transaction id.
    #[must_use]
    pub const fn from_confirm(confirm: &DataConfirm) -> Self {
        Self::new()
            .src_endpoint(confirm.endpoint)
            .sequence(confirm.trans_id)
    }

    /// Full match: every field, including unset ones, must be equal.
    #[must_use]
    pub fn matches_exactly(&self, key: &Self) -> bool {
        self == key
    }

    /// Partial match: every field this registration sets must equal the key's.
    #[must_use]
    pub fn matches_partially(&self, key: &Self) -> bool {
        fn field<T: PartialEq>(want: Option<&T>, have: Option<&T>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }
        field(self.address.as_ref(), key.address.as_ref())
            && field(self.profile_id.as_ref(), key.profile_id.as_ref())
            && field(self.cluster_id.as_ref(), key.cluster_id.as_ref())
            && field(self.src_endpoint.as_ref(), key.src_endpoint.as_ref())
            && field(self.dst_endpoint.as_ref(), key.dst_endpoint.as_ref())
            && field(self.sequence.as_ref(), key.sequence.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MatchCriteria {
        MatchCriteria::new()
            .address(Address::Short(0x1234))
            .profile(0x0104)
            .cluster(0x0006)
            .src_endpoint(1)
            .dst_endpoint(1)
            .sequence(7)
    }

    #[test]
    fn test_exact_requires_all_fields() {
        assert!(key().matches_exactly(&key()));
        assert!(!key().sequence(8).matches_exactly(&key()));

        let mut missing = key();
        missing.profile_id = None;
        assert!(!missing.matches_exactly(&key()));
    }

    #[test]
    fn test_partial_uses_declared_subset() {
        let subscription = MatchCriteria::new().profile(0x0104).cluster(0x0006);
        assert!(subscription.matches_partially(&key()));
        assert!(!subscription.matches_partially(&key().cluster(0x0008)));
        assert!(MatchCriteria::new().matches_partially(&key()));
    }

    #[test]
    fn test_partial_fails_when_key_lacks_field() {
        let subscription = MatchCriteria::new().sequence(7);
        let mut without_sequence = key();
        without_sequence.sequence = None;
        assert!(!subscription.matches_partially(&without_sequence));
    }

    #[test]
    fn test_confirm_key() {
        let confirm = DataConfirm {
            status: 0,
            endpoint: 1,
            trans_id: 42,
        };
        let expected = MatchCriteria::new().src_endpoint(1).sequence(42);
        assert!(expected.matches_exactly(&MatchCriteria::from_confirm(&confirm)));
    }
}
