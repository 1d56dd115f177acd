//! End-to-end guide flow: replayed walk -> location feed -> reconciler -> playback worker
//!
//! Runs on paused tokio time so clip lengths and replay intervals cost nothing.

use audio_tour::domain::geo::offset_north;
use audio_tour::domain::types::{AudioLocator, Coordinates, PoiId, PoiStatus};
use audio_tour::infra::{Config, Metrics, PoiConfig};
use audio_tour::io::{create_location_feed, FeedControl, RecordedFix, ReplaySource};
use audio_tour::services::{
    create_playback_worker, AudioOutput, GuideSnapshot, PoiRegistry, Reconciler, SimulatedOutput,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const CLIP: Duration = Duration::from_secs(5);
const FOUNTAIN_AUDIO: &str = "https://audio.example/fountain.mp3";
const STATION_AUDIO: &str = "https://audio.example/station.mp3";

fn origin() -> Coordinates {
    Coordinates::new(-22.97, -45.545)
}

fn poi_config(id: &str, audio: &str, meters_north: f64) -> PoiConfig {
    let coords = offset_north(&origin(), meters_north);
    PoiConfig {
        id: id.to_string(),
        name: id.to_uppercase(),
        description: String::new(),
        audio_src: audio.to_string(),
        latitude: coords.latitude,
        longitude: coords.longitude,
        trigger_radius_m: 30.0,
    }
}

/// Fixes along a straight walk north, one per replay interval
fn walk(meters: &[f64]) -> Vec<RecordedFix> {
    meters
        .iter()
        .map(|m| RecordedFix::unstamped(offset_north(&origin(), *m).with_accuracy(5.0)))
        .collect()
}

struct Guide {
    output: Arc<SimulatedOutput>,
    metrics: Arc<Metrics>,
    status_rx: watch::Receiver<GuideSnapshot>,
    feed_control: FeedControl,
    shutdown_tx: watch::Sender<bool>,
    reconciler: JoinHandle<Reconciler>,
}

fn start_guide(fixes: Vec<RecordedFix>, output: SimulatedOutput) -> Guide {
    let config = Config::default();
    let registry = PoiRegistry::from_config(&[
        poi_config("fountain", FOUNTAIN_AUDIO, 100.0),
        poi_config("station", STATION_AUDIO, 400.0),
    ])
    .unwrap();

    let output = Arc::new(output);
    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(100);

    let (cmd_tx, worker) = create_playback_worker(
        output.clone() as Arc<dyn AudioOutput>,
        event_tx.clone(),
        metrics.clone(),
        16,
    );
    tokio::spawn(worker.run());

    let mut reconciler = Reconciler::new(&config, registry, cmd_tx, metrics.clone());
    let status_rx = reconciler.status_feed();

    let source = ReplaySource::from_fixes(fixes, Duration::from_secs(1));
    let (feed_control, feed) =
        create_location_feed(Box::new(source), event_tx, Duration::from_secs(10), metrics.clone());
    tokio::spawn(feed.run(shutdown_rx.clone()));
    feed_control.start();

    let reconciler = tokio::spawn(async move {
        reconciler.run(event_rx, shutdown_rx).await;
        reconciler
    });

    Guide { output, metrics, status_rx, feed_control, shutdown_tx, reconciler }
}

fn status_of(snapshot: &GuideSnapshot, id: &str) -> PoiStatus {
    snapshot
        .pois
        .iter()
        .find(|p| p.id.as_str() == id)
        .map(|p| p.status)
        .unwrap()
}

/// Wait until the status feed satisfies `pred`, returning that snapshot
async fn wait_for(
    status_rx: &mut watch::Receiver<GuideSnapshot>,
    pred: impl Fn(&GuideSnapshot) -> bool,
) -> GuideSnapshot {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            {
                let snapshot = status_rx.borrow_and_update();
                if pred(&*snapshot) {
                    return snapshot.clone();
                }
            }
            status_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("status feed never reached the expected state")
}

fn locator(raw: &str) -> AudioLocator {
    AudioLocator::parse(raw).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_walk_plays_then_fails_then_halts() {
    // Approach the fountain, linger past the clip length, then walk on to the station
    let mut meters = vec![0.0, 40.0];
    meters.extend([90.0; 8]);
    meters.extend([200.0, 300.0]);
    meters.extend([390.0; 4]);

    let output = SimulatedOutput::new(CLIP).with_failing(&locator(STATION_AUDIO));
    let mut guide = start_guide(walk(&meters), output);

    let playing = wait_for(&mut guide.status_rx, |s| s.playing.is_some()).await;
    assert_eq!(playing.playing, Some(PoiId::from("fountain")));
    assert_eq!(status_of(&playing, "fountain"), PoiStatus::Playing);
    assert_eq!(status_of(&playing, "station"), PoiStatus::Idle);

    let played = wait_for(&mut guide.status_rx, |s| status_of(s, "fountain") == PoiStatus::Played)
        .await;
    assert_eq!(played.playing, None);

    let failed =
        wait_for(&mut guide.status_rx, |s| status_of(s, "station") == PoiStatus::Error).await;
    assert_eq!(status_of(&failed, "fountain"), PoiStatus::Played);

    // The replay runs dry, which ends the tracking session
    let halted = wait_for(&mut guide.status_rx, |s| !s.tracking).await;
    assert_eq!(halted.playing, None);
    assert_eq!(status_of(&halted, "fountain"), PoiStatus::Played);
    assert_eq!(status_of(&halted, "station"), PoiStatus::Error);
    assert!(!guide.feed_control.is_started());

    assert_eq!(
        guide.output.history(),
        vec![locator(FOUNTAIN_AUDIO), locator(STATION_AUDIO)]
    );
    assert_eq!(guide.metrics.playback_starts_total(), 2);
    assert_eq!(guide.metrics.stale_events_total(), 0);
    assert_eq!(guide.metrics.location_fixes_total(), meters.len() as u64);

    guide.shutdown_tx.send(true).unwrap();
    let reconciler = guide.reconciler.await.unwrap();
    assert_eq!(reconciler.registry().playing_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stopping_tracking_interrupts_playback() {
    let mut meters = vec![0.0, 90.0];
    meters.extend([90.0; 20]);

    let mut guide = start_guide(walk(&meters), SimulatedOutput::new(CLIP * 4));

    wait_for(&mut guide.status_rx, |s| s.playing.is_some()).await;
    guide.feed_control.stop();

    let halted = wait_for(&mut guide.status_rx, |s| !s.tracking).await;
    assert_eq!(halted.playing, None);
    assert_eq!(status_of(&halted, "fountain"), PoiStatus::Idle);

    // Let the interrupted session wind down; it must not report back as played
    tokio::time::sleep(CLIP * 8).await;
    let later = guide.status_rx.borrow().clone();
    assert_eq!(status_of(&later, "fountain"), PoiStatus::Idle);
    assert_eq!(guide.output.history(), vec![locator(FOUNTAIN_AUDIO)]);
    assert_eq!(guide.metrics.playback_stops_total(), 1);

    // Restarting resumes the walk where it left off and replays the fountain
    guide.feed_control.start();
    wait_for(&mut guide.status_rx, |s| s.playing.is_some()).await;
    assert_eq!(guide.output.history().len(), 2);

    guide.shutdown_tx.send(true).unwrap();
    let reconciler = guide.reconciler.await.unwrap();
    assert!(reconciler.slot_holder().is_none());
    assert_eq!(reconciler.registry().playing_count(), 0);
}
