use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use aegis_ipc::{Artwork, Event, MediaInfo, TrackKey};

use super::policy::LruCache;
use super::Monitor;
use crate::bus::EventBus;
use crate::config::MonitorSettings;
use crate::error::{Error, Result};

struct MediaState {
    /// Last full payload, diffs are merged into it
    raw: Map<String, Value>,
    artwork: LruCache<TrackKey, Artwork>,
    /// Outer `None` until the first publish
    published: Option<Option<MediaInfo>>,
}

struct Inner {
    bus: EventBus,
    command: Vec<String>,
    state: Mutex<MediaState>,
}

/// Follows a now-playing JSON-lines stream and republishes it as
/// `MediaChanged`, keeping artwork across updates that omit it.
#[derive(Clone)]
pub struct MediaMonitor {
    inner: Arc<Inner>,
}

impl MediaMonitor {
    pub fn new(bus: EventBus, settings: &MonitorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                command: settings.media_command.clone(),
                state: Mutex::new(MediaState {
                    raw: Map::new(),
                    artwork: LruCache::new(settings.artwork_cache_size),
                    published: None,
                }),
            }),
        }
    }

    /// Feed one line of the stream. Returns whether an event was published.
    pub fn handle_line(&self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }
        let value: Value = serde_json::from_str(line).map_err(|source| Error::Decode {
            what: "now-playing update",
            source,
        })?;
        let Value::Object(mut envelope) = value else {
            tracing::debug!("Ignoring non-object now-playing line");
            return Ok(false);
        };

        let (diff, payload) = match envelope.get("type").and_then(Value::as_str) {
            Some("data") => {
                let diff = envelope
                    .get("diff")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let payload = match envelope.remove("payload") {
                    Some(Value::Object(payload)) => payload,
                    _ => Map::new(),
                };
                (diff, payload)
            }
            Some(other) => {
                tracing::debug!("Ignoring now-playing message of type {}", other);
                return Ok(false);
            }
            None => (false, envelope),
        };

        let mut guard = self.inner.state.lock().expect("media state lock poisoned");
        let state = &mut *guard;
        if diff {
            for (key, value) in payload {
                if value.is_null() {
                    state.raw.remove(&key);
                } else {
                    state.raw.insert(key, value);
                }
            }
        } else {
            state.raw = payload;
        }

        let media = normalize(&state.raw, &mut state.artwork);
        let unchanged = match (&state.published, &media) {
            (Some(None), None) => true,
            (Some(Some(last)), Some(current)) => last.same_state(current),
            _ => false,
        };
        if unchanged {
            tracing::debug!("Duplicate now-playing update suppressed");
            return Ok(false);
        }
        state.published = Some(media.clone());
        drop(guard);

        self.inner.bus.publish(Event::MediaChanged { media });
        Ok(true)
    }
}

fn text(raw: &Map<String, Value>, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Build the published shape from a raw payload. No title means nothing is
/// playing.
fn normalize(
    raw: &Map<String, Value>,
    artwork: &mut LruCache<TrackKey, Artwork>,
) -> Option<MediaInfo> {
    let title = text(raw, "title");
    if title.is_empty() {
        return None;
    }
    let artist = text(raw, "artist");
    let track = TrackKey::new(&title, &artist);

    let embedded = raw
        .get("artworkData")
        .and_then(Value::as_str)
        .and_then(Artwork::from_base64)
        .filter(|art| !art.is_empty());
    let art = match embedded {
        Some(art) => {
            artwork.insert(track.clone(), art.clone());
            Some(art)
        }
        None => artwork.get(&track).cloned(),
    };

    let bundle = text(raw, "bundleIdentifier");
    Some(MediaInfo {
        title,
        artist,
        album: text(raw, "album"),
        playing: raw.get("playing").and_then(Value::as_bool).unwrap_or(false),
        bundle_identifier: (!bundle.is_empty()).then_some(bundle),
        artwork: art,
        track,
    })
}

impl Monitor for MediaMonitor {
    fn name(&self) -> &'static str {
        "media"
    }

    fn start(&self) -> Result<()> {
        let Some((program, args)) = self.inner.command.split_first() else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "media command is empty",
            )));
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: self.inner.command.join(" "),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            return Err(Error::Io(std::io::Error::other("media command has no stdout")));
        };

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            // Held so the stream process dies with the task
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        if let Err(e) = (MediaMonitor { inner }).handle_line(&line) {
                            tracing::warn!("Bad now-playing update: {}", e);
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Now-playing stream ended");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Now-playing stream read failed: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_ipc::EventKind;

    fn setup() -> (MediaMonitor, EventBus, Arc<Mutex<Vec<Option<MediaInfo>>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(EventKind::MediaChanged, move |event| {
            if let Event::MediaChanged { media } = event {
                s.lock().unwrap().push(media.clone());
            }
        })
        .detach();
        let monitor = MediaMonitor::new(bus.clone(), &MonitorSettings::default());
        (monitor, bus, seen)
    }

    fn data(diff: bool, payload: Value) -> String {
        serde_json::json!({"type": "data", "diff": diff, "payload": payload}).to_string()
    }

    #[test]
    fn test_full_update_then_duplicate() {
        let (monitor, bus, seen) = setup();
        let line = data(
            false,
            serde_json::json!({
                "title": "So What",
                "artist": "Miles Davis",
                "album": "Kind of Blue",
                "playing": true,
                "bundleIdentifier": "com.apple.Music"
            }),
        );
        assert!(monitor.handle_line(&line).unwrap());
        assert!(!monitor.handle_line(&line).unwrap());
        bus.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let media = seen[0].as_ref().unwrap();
        assert_eq!(media.album, "Kind of Blue");
        assert_eq!(media.bundle_identifier.as_deref(), Some("com.apple.Music"));
        assert_eq!(media.track, TrackKey::new("so what", "miles davis"));
        assert!(media.playing);
    }

    #[test]
    fn test_diff_merges_into_previous_state() {
        let (monitor, bus, seen) = setup();
        monitor
            .handle_line(&data(
                false,
                serde_json::json!({"title": "So What", "artist": "Miles Davis", "playing": true}),
            ))
            .unwrap();
        monitor
            .handle_line(&data(true, serde_json::json!({"playing": false})))
            .unwrap();
        bus.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let media = seen[1].as_ref().unwrap();
        assert_eq!(media.title, "So What");
        assert!(!media.playing);
    }

    #[test]
    fn test_empty_payload_means_nothing_playing() {
        let (monitor, bus, seen) = setup();
        monitor
            .handle_line(&data(false, serde_json::json!({"title": "Song"})))
            .unwrap();
        monitor.handle_line(&data(false, serde_json::json!({}))).unwrap();
        assert!(!monitor.handle_line(&data(false, serde_json::json!({}))).unwrap());
        bus.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_none());
    }

    #[test]
    fn test_case_only_title_change_is_published() {
        let (monitor, bus, seen) = setup();
        monitor
            .handle_line(&data(
                false,
                serde_json::json!({"title": "So what", "artist": "Miles Davis", "artworkData": "aGVsbG8="}),
            ))
            .unwrap();
        assert!(monitor
            .handle_line(&data(true, serde_json::json!({"title": "So What"})))
            .unwrap());
        bus.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let media = seen[1].as_ref().unwrap();
        assert_eq!(media.title, "So What");
        // Same cache key, so the artwork carries over
        assert_eq!(media.artwork.clone().unwrap().bytes(), b"hello");
    }

    #[test]
    fn test_artwork_survives_updates_without_it() {
        let (monitor, bus, seen) = setup();
        monitor
            .handle_line(&data(
                false,
                serde_json::json!({"title": "Song", "artist": "A", "artworkData": "aGVsbG8="}),
            ))
            .unwrap();
        monitor
            .handle_line(&data(false, serde_json::json!({"title": "Other", "artist": "B"})))
            .unwrap();
        // Back to the first track, no embedded art this time
        monitor
            .handle_line(&data(false, serde_json::json!({"title": "Song", "artist": "A"})))
            .unwrap();
        bus.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].as_ref().unwrap().artwork.is_none());
        let art = seen[2].as_ref().unwrap().artwork.clone().unwrap();
        assert_eq!(art.bytes(), b"hello");
    }

    #[test]
    fn test_plain_object_lines_and_other_types() {
        let (monitor, bus, seen) = setup();
        assert!(!monitor
            .handle_line(r#"{"type":"status","payload":{}}"#)
            .unwrap());
        assert!(monitor
            .handle_line(r#"{"title":"Song","artist":"A","playing":true}"#)
            .unwrap());
        assert!(monitor.handle_line("not json").is_err());
        assert!(!monitor.handle_line("   ").unwrap());
        bus.flush();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
