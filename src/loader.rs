//! The single cancellable load task: summary, then inline arrays, then the bulk route, then one
//! request per still-missing channel.

use allelescope_protocol::{ChannelArrays, SampleSummary};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, SampleStore};
use crate::sample::{ChannelId, SampleModel};
use crate::size_standard::SizeLadderCatalog;

/// Identity of one in-flight load. Only the newest ticket may install its result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadTicket {
    pub sample_id: String,
    pub generation: u64,
}

#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.is_cancelled() {
            Err(RemoteError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadOutcome {
    pub model: SampleModel,
    /// Channels whose arrays could not be fetched, with the reason.
    pub unavailable: Vec<(ChannelId, String)>,
}

/// Channels listed in the summary, or only referenced by its peak table, that still lack arrays.
fn channels_needing_arrays(summary: &SampleSummary) -> Vec<ChannelId> {
    let listed = summary
        .channels
        .iter()
        .filter(|(_, c)| c.data_available != Some(false))
        .filter(|(_, c)| {
            ChannelArrays {
                raw_data: c.raw_data.clone(),
                analyzed_data: c.analyzed_data.clone(),
            }
            .is_empty()
        })
        .map(|(key, _)| key);
    let peaks_only = summary
        .peaks
        .keys()
        .filter(|key| !summary.channels.contains_key(*key));
    listed
        .chain(peaks_only)
        .filter_map(|key| ChannelId::parse(key))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn load_sample(
    store: &dyn SampleStore,
    sample_id: &str,
    ladders: &SizeLadderCatalog,
    cancel: &CancelFlag,
) -> Result<LoadOutcome, RemoteError> {
    let summary = store.fetch_summary(sample_id)?;
    cancel.check()?;

    let needed = channels_needing_arrays(&summary);
    let mut arrays = BTreeMap::new();
    let mut unavailable = vec![];

    if !needed.is_empty() || summary.channels.is_empty() {
        match store.fetch_raw_data(sample_id) {
            Ok(bulk) => {
                for (key, channel_arrays) in bulk.channels {
                    match ChannelId::parse(&key) {
                        Some(id) => {
                            arrays.insert(id, channel_arrays);
                        }
                        None => warn!(key = key.as_str(), "skipping unrecognized channel key"),
                    }
                }
                debug!(sample_id, channels = arrays.len(), "bulk raw data fetched");
            }
            Err(e) => {
                info!(sample_id, error = %e, "bulk raw data unavailable, fetching per channel");
            }
        }
        cancel.check()?;

        for id in needed {
            if arrays.contains_key(&id) {
                continue;
            }
            match store.fetch_channel(sample_id, id) {
                Ok(channel_arrays) => {
                    arrays.insert(id, channel_arrays);
                }
                Err(e) => {
                    warn!(sample_id, channel = id.0, error = %e, "channel data unavailable");
                    unavailable.push((id, e.to_string()));
                }
            }
            cancel.check()?;
        }
    }

    Ok(LoadOutcome {
        model: SampleModel::assemble(&summary, &arrays, ladders),
        unavailable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteErrorKind;
    use crate::remote::testing::FakeStore;
    use crate::size_standard::default_size_ladders;
    use allelescope_protocol::RawDataResponse;

    const SUMMARY: &str = r#"{"id":"s","channels":{
        "channel_1":{},
        "channel_2":{},
        "channel_3":{"data_available":false},
        "channel_4":{"raw_data":[1,2,3]}}}"#;

    #[test]
    fn test_per_channel_fallback() {
        let mut store = FakeStore::default().with_summary_json(SUMMARY);
        store.channels.insert(
            ("s".to_string(), 1),
            ChannelArrays {
                raw_data: Some(vec![0.0, 5.0, 50.0]),
                analyzed_data: None,
            },
        );
        let outcome =
            load_sample(&store, "s", &default_size_ladders(), &CancelFlag::default()).unwrap();
        assert_eq!(*store.channel_requests.lock().unwrap(), vec![1, 2]);
        assert_eq!(outcome.unavailable.len(), 1);
        assert_eq!(outcome.unavailable[0].0, ChannelId(2));

        let model = outcome.model;
        assert!(model.channel(ChannelId(1)).unwrap().has_displayable_data());
        assert!(!model.channel(ChannelId(2)).unwrap().data_available);
        assert!(!model.channel(ChannelId(3)).unwrap().data_available);
        assert_eq!(model.channel(ChannelId(4)).unwrap().raw.len(), 3);
    }

    #[test]
    fn test_bulk_route_skips_channel_requests() {
        let mut store = FakeStore::default().with_summary_json(SUMMARY);
        let bulk: RawDataResponse = serde_json::from_str(
            r#"{"channels":{"channel_1":{"raw_data":[1,2]},"channel_2":{"raw_data":[],"analyzed_data":[]}}}"#,
        )
        .unwrap();
        store.raw_data.insert("s".to_string(), bulk);
        let outcome =
            load_sample(&store, "s", &default_size_ladders(), &CancelFlag::default()).unwrap();
        assert!(store.channel_requests.lock().unwrap().is_empty());
        assert!(outcome.unavailable.is_empty());
        let two = outcome.model.channel(ChannelId(2)).unwrap().clone();
        assert!(two.data_available);
        assert!(!two.has_displayable_data());
    }

    #[test]
    fn test_peak_only_channel_is_fetched_individually() {
        let mut store = FakeStore::default()
            .with_summary_json(r#"{"id":"s","peaks":{"channel_1":[{"position":2,"height":50}]}}"#);
        store.channels.insert(
            ("s".to_string(), 1),
            ChannelArrays {
                raw_data: Some(vec![0.0, 5.0, 50.0, 5.0, 0.0]),
                analyzed_data: None,
            },
        );
        let outcome =
            load_sample(&store, "s", &default_size_ladders(), &CancelFlag::default()).unwrap();
        assert_eq!(*store.channel_requests.lock().unwrap(), vec![1]);
        assert!(outcome.unavailable.is_empty());
        let one = outcome.model.channel(ChannelId(1)).unwrap();
        assert!(one.data_available);
        assert_eq!(one.value_at(2), Some(50.0));
    }

    #[test]
    fn test_peak_only_channel_failure_is_reported() {
        let store = FakeStore::default()
            .with_summary_json(r#"{"id":"s","peaks":{"channel_2":[{"position":0,"height":9}]}}"#);
        let outcome =
            load_sample(&store, "s", &default_size_ladders(), &CancelFlag::default()).unwrap();
        assert_eq!(*store.channel_requests.lock().unwrap(), vec![2]);
        assert_eq!(outcome.unavailable.len(), 1);
        assert_eq!(outcome.unavailable[0].0, ChannelId(2));
    }

    #[test]
    fn test_missing_summary_is_an_error() {
        let store = FakeStore::default();
        let err = load_sample(&store, "nope", &default_size_ladders(), &CancelFlag::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cancelled_load_stops_after_summary() {
        let store = FakeStore::default().with_summary_json(SUMMARY);
        let cancel = CancelFlag::default();
        cancel.cancel();
        let err = load_sample(&store, "s", &default_size_ladders(), &cancel).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Cancelled);
        assert!(store.channel_requests.lock().unwrap().is_empty());
    }
}
