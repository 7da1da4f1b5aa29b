use crate::harvest::config::PolicyMode;
use crate::harvest::fetch::RemoteValidators;
use crate::harvest::ledger::LedgerIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No prior observation for this (period, url).
    Fresh,
    /// Nothing to do; `Plan::reason` says why.
    Skip,
    /// Content is presumed changed; keep history, write version N+1.
    Version,
    /// Content is presumed changed; replace the current row in place.
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub decision: Decision,
    pub reason: &'static str,
}

/// Decide what to do for (period, url) before any body bytes are fetched.
///
/// The header gate trusts a fresh ETag/Last-Modified pair that equals the
/// stored one and skips without hashing content — a deliberate staleness
/// window, inherited from the source system. Both validators absent on
/// either side means the gate cannot fire. A `Version`/`Overwrite` result
/// is tentative: the materializer still downgrades it to "unchanged" when
/// the staged content hash matches the current record.
pub fn plan(
    index: &LedgerIndex,
    period: &str,
    url: &str,
    probed: Option<&RemoteValidators>,
    mode: PolicyMode,
) -> Plan {
    let Some(current) = index.current(period, url) else {
        return Plan {
            decision: Decision::Fresh,
            reason: "no-prior-record",
        };
    };

    if let Some(remote) = probed
        && remote.usable()
        && remote.etag == current.etag
        && remote.last_modified == current.last_modified
    {
        return Plan {
            decision: Decision::Skip,
            reason: "unchanged-by-headers",
        };
    }

    match mode {
        PolicyMode::Safe => Plan {
            decision: Decision::Version,
            reason: "content-check-pending",
        },
        PolicyMode::Overwrite => Plan {
            decision: Decision::Overwrite,
            reason: "content-check-pending",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::ledger::LedgerRecord;

    fn seeded_index(etag: Option<&str>, last_modified: Option<&str>) -> LedgerIndex {
        LedgerIndex::build(&[LedgerRecord {
            period: "2023".to_string(),
            url: "https://x/a.pdf".to_string(),
            filename: "a.pdf".to_string(),
            saved_path: "/tmp/2023/a.pdf".to_string(),
            hash: "h1".to_string(),
            etag: etag.map(ToOwned::to_owned),
            last_modified: last_modified.map(ToOwned::to_owned),
            content_length: None,
            version: 1,
            last_seen_at: "2025-01-01T00:00:00Z".to_string(),
        }])
    }

    #[test]
    fn unknown_pair_is_fresh() {
        let index = LedgerIndex::build(&[]);
        let got = plan(&index, "2023", "https://x/a.pdf", None, PolicyMode::Safe);
        assert_eq!(got.decision, Decision::Fresh);
        assert_eq!(got.reason, "no-prior-record");
    }

    #[test]
    fn matching_validators_skip() {
        let index = seeded_index(Some("\"abc\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        let probed = RemoteValidators {
            etag: Some("\"abc\"".to_string()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
            content_length: None,
        };
        let got = plan(
            &index,
            "2023",
            "https://x/a.pdf",
            Some(&probed),
            PolicyMode::Safe,
        );
        assert_eq!(got.decision, Decision::Skip);
        assert_eq!(got.reason, "unchanged-by-headers");
    }

    #[test]
    fn changed_etag_falls_through_to_mode() {
        let index = seeded_index(Some("\"abc\""), None);
        let probed = RemoteValidators {
            etag: Some("\"def\"".to_string()),
            last_modified: None,
            content_length: None,
        };

        let safe = plan(
            &index,
            "2023",
            "https://x/a.pdf",
            Some(&probed),
            PolicyMode::Safe,
        );
        assert_eq!(safe.decision, Decision::Version);

        let overwrite = plan(
            &index,
            "2023",
            "https://x/a.pdf",
            Some(&probed),
            PolicyMode::Overwrite,
        );
        assert_eq!(overwrite.decision, Decision::Overwrite);
    }

    #[test]
    fn probe_failure_never_skips() {
        let index = seeded_index(Some("\"abc\""), None);
        let got = plan(&index, "2023", "https://x/a.pdf", None, PolicyMode::Safe);
        assert_eq!(got.decision, Decision::Version);
    }

    #[test]
    fn both_sides_without_validators_cannot_match() {
        // The legacy implementation compared "|"-joined strings, which made
        // two absent validator pairs equal. That is not a match here.
        let index = seeded_index(None, None);
        let probed = RemoteValidators::default();
        let got = plan(
            &index,
            "2023",
            "https://x/a.pdf",
            Some(&probed),
            PolicyMode::Safe,
        );
        assert_eq!(got.decision, Decision::Version);
    }
}
