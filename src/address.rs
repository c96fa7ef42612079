//! Pure address selection over provider-ordered network mappings.
//!
//! No external calls happen here. Ordering sensitivity is deliberate: the
//! "first" network or address is whichever the provider returned first.

use crate::provider::Addresses;

/// Which address a caller wants out of an instance's network mapping.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkSelector {
    /// First address of the network named exactly `public`.
    Public,
    /// First address of the network named exactly `private`.
    Private,
    /// First address of the network with the given name.
    Named(String),
    /// First address of whichever network the provider listed first.
    Any,
}

impl NetworkSelector {
    /// Maps a configured bootstrap-network name onto a selector.
    #[must_use]
    pub fn from_network_name(name: &str) -> Self {
        match name {
            "public" => Self::Public,
            "private" => Self::Private,
            other => Self::Named(other.to_owned()),
        }
    }
}

/// Resolves the single best address for `selector`.
///
/// Returns `None` when the mapping has no matching network or the matching
/// network's address list is empty.
#[must_use]
pub fn resolve<'a>(addresses: &'a Addresses, selector: &NetworkSelector) -> Option<&'a str> {
    let records = match selector {
        NetworkSelector::Public => addresses.network("public"),
        NetworkSelector::Private => addresses.network("private"),
        NetworkSelector::Named(name) => addresses.network(name),
        NetworkSelector::Any => addresses.first_network().map(|(_, records)| records),
    }?;
    records.first().map(|record| record.address.as_str())
}

/// Selects the first available address in priority order: `public`, then
/// `private`, then the first address of whichever network comes first.
///
/// Used when network-based selection is disabled entirely.
#[must_use]
pub fn first_available(addresses: &Addresses) -> Option<&str> {
    resolve(addresses, &NetworkSelector::Public)
        .or_else(|| resolve(addresses, &NetworkSelector::Private))
        .or_else(|| resolve(addresses, &NetworkSelector::Any))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AddressRecord;
    use rstest::rstest;

    fn sample() -> Addresses {
        Addresses::from_pairs(vec![
            (
                "public".to_owned(),
                vec![
                    AddressRecord::fixed_v4("198.51.100.7"),
                    AddressRecord::floating_v4("203.0.113.5"),
                ],
            ),
            (
                "private".to_owned(),
                vec![AddressRecord::fixed_v4("10.0.0.4")],
            ),
        ])
    }

    #[rstest]
    #[case(NetworkSelector::Public, Some("198.51.100.7"))]
    #[case(NetworkSelector::Private, Some("10.0.0.4"))]
    #[case(NetworkSelector::Named("private".to_owned()), Some("10.0.0.4"))]
    #[case(NetworkSelector::Named("absent".to_owned()), None)]
    #[case(NetworkSelector::Any, Some("198.51.100.7"))]
    fn resolve_selects_first_address(
        #[case] selector: NetworkSelector,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(resolve(&sample(), &selector), expected);
    }

    #[test]
    fn resolve_returns_none_for_empty_mapping() {
        assert_eq!(resolve(&Addresses::new(), &NetworkSelector::Public), None);
        assert_eq!(resolve(&Addresses::new(), &NetworkSelector::Any), None);
    }

    #[test]
    fn resolve_returns_none_for_empty_address_list() {
        let addresses = Addresses::from_pairs(vec![("public".to_owned(), Vec::new())]);
        assert_eq!(resolve(&addresses, &NetworkSelector::Public), None);
    }

    #[test]
    fn first_available_prefers_public_then_private() {
        assert_eq!(first_available(&sample()), Some("198.51.100.7"));

        let private_only = Addresses::from_pairs(vec![(
            "private".to_owned(),
            vec![AddressRecord::fixed_v4("10.0.0.4")],
        )]);
        assert_eq!(first_available(&private_only), Some("10.0.0.4"));
    }

    #[test]
    fn first_available_falls_back_to_first_network() {
        let custom = Addresses::from_pairs(vec![(
            "tenant-net".to_owned(),
            vec![AddressRecord::fixed_v4("192.0.2.9")],
        )]);
        assert_eq!(first_available(&custom), Some("192.0.2.9"));
    }
}
