use crate::config::MAX_VOLUME;
use crate::error::{RadioError, Result};
use crate::player::{HandleFactory, HandleOptions, PlaybackHandle};
use crate::station::{Station, StationState};
use tracing::{debug, info, warn};

pub trait StationView {
    fn render_label(&mut self, index: usize, frequency_label: &str, title: &str);
    fn set_active(&mut self, index: usize, active: bool);
    fn playback_failed(&mut self, _index: usize, _reason: &str) {}
}

struct StationSlot {
    station: Station,
    handle: Option<Box<dyn PlaybackHandle>>,
    state: StationState,
}

pub struct StationController<V, F> {
    slots: Vec<StationSlot>,
    active_index: usize,
    view: V,
    factory: F,
    options: HandleOptions,
}

impl<V: StationView, F: HandleFactory> StationController<V, F> {
    pub fn new(
        stations: Vec<Station>,
        mut view: V,
        factory: F,
        options: HandleOptions,
    ) -> Result<Self> {
        if stations.is_empty() {
            return Err(RadioError::Config("no stations configured".into()));
        }

        for (i, station) in stations.iter().enumerate() {
            view.render_label(i, &station.frequency_label, &station.title);
        }

        let slots = stations
            .into_iter()
            .map(|station| StationSlot {
                station,
                handle: None,
                state: StationState::Unloaded,
            })
            .collect();

        Ok(Self {
            slots,
            active_index: 0,
            view,
            factory,
            options,
        })
    }

    // Handles are created on first play and never dropped afterwards.
    pub fn play(&mut self, index: Option<usize>) -> Result<()> {
        let target = index.unwrap_or(self.active_index);
        self.check_index(target)?;

        self.stop();

        let options = self.options;
        let slot = &mut self.slots[target];
        if slot.handle.is_none() {
            match self.factory.create(target, &slot.station, &options) {
                Ok(handle) => {
                    debug!(index = target, "handle created");
                    slot.handle = Some(handle);
                    slot.state = StationState::Stopped;
                }
                Err(e) => return self.fail(target, e),
            }
        }

        let started = match slot.handle.as_mut() {
            Some(handle) => handle.play(),
            None => Err(RadioError::playback(target, "station has no handle")),
        };
        if let Err(e) = started {
            return self.fail(target, e);
        }

        slot.state = StationState::Playing;
        info!(index = target, station = %slot.station.frequency_label, "playing");
        self.view.set_active(target, true);
        self.active_index = target;
        Ok(())
    }

    pub fn stop(&mut self) {
        let index = self.active_index;
        let slot = &mut self.slots[index];
        if let Some(handle) = slot.handle.as_mut() {
            handle.stop();
            slot.state = StationState::Stopped;
            debug!(index, "stopped");
        }
        self.view.set_active(index, false);
    }

    // Read the target's state before stop(), or the playing row would restart.
    pub fn activate(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;

        let should_play = self.slots[index].state != StationState::Playing;
        self.stop();

        if should_play {
            self.play(Some(index))
        } else {
            Ok(())
        }
    }

    // Only acts while the station is marked playing and its handle says it isn't.
    pub fn report_failure(&mut self, index: usize, reason: &str) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        let handle_playing = slot.handle.as_ref().is_some_and(|h| h.is_playing());
        if slot.state != StationState::Playing || handle_playing {
            return;
        }

        warn!(index, reason, "stream stopped");
        slot.state = StationState::Stopped;
        self.view.set_active(index, false);
        self.view.playback_failed(index, reason);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, MAX_VOLUME);
        self.options.volume = volume;
        for handle in self.slots.iter_mut().filter_map(|s| s.handle.as_mut()) {
            handle.set_volume(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.options.volume
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_station(&self) -> &Station {
        &self.slots[self.active_index].station
    }

    pub fn is_playing(&self) -> bool {
        self.slots[self.active_index].state == StationState::Playing
    }

    pub fn state(&self, index: usize) -> Option<StationState> {
        self.slots.get(index).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.slots.len() {
            Ok(())
        } else {
            Err(RadioError::InvalidIndex {
                index,
                len: self.slots.len(),
            })
        }
    }

    fn fail(&mut self, index: usize, err: RadioError) -> Result<()> {
        warn!(index, error = %err, "playback failed");
        self.active_index = index;
        self.view.set_active(index, false);
        self.view.playback_failed(index, &err.to_string());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transport;
    use crate::station::StreamSource;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Create(usize),
        Play(usize),
        Stop(usize),
        Volume(usize),
    }

    #[derive(Default)]
    struct Backend {
        calls: Vec<Call>,
        playing: Vec<bool>,
        refuse_create: Vec<usize>,
        refuse_play: Vec<usize>,
    }

    type Shared = Rc<RefCell<Backend>>;

    struct FakeHandle {
        index: usize,
        backend: Shared,
    }

    impl PlaybackHandle for FakeHandle {
        fn play(&mut self) -> Result<()> {
            let mut b = self.backend.borrow_mut();
            b.calls.push(Call::Play(self.index));
            if b.refuse_play.contains(&self.index) {
                return Err(RadioError::playback(self.index, "dead stream"));
            }
            b.playing[self.index] = true;
            Ok(())
        }

        fn stop(&mut self) {
            let mut b = self.backend.borrow_mut();
            b.calls.push(Call::Stop(self.index));
            b.playing[self.index] = false;
        }

        fn is_playing(&self) -> bool {
            self.backend.borrow().playing[self.index]
        }

        fn set_volume(&mut self, _volume: f32) {
            self.backend.borrow_mut().calls.push(Call::Volume(self.index));
        }
    }

    struct FakeFactory(Shared);

    impl HandleFactory for FakeFactory {
        fn create(
            &mut self,
            index: usize,
            _station: &Station,
            _options: &HandleOptions,
        ) -> Result<Box<dyn PlaybackHandle>> {
            let mut b = self.0.borrow_mut();
            if b.refuse_create.contains(&index) {
                return Err(RadioError::playback(index, "no audio device"));
            }
            b.calls.push(Call::Create(index));
            Ok(Box::new(FakeHandle {
                index,
                backend: self.0.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct FakeView {
        labels: Vec<String>,
        active: Vec<bool>,
        updates: usize,
        failures: Vec<usize>,
    }

    impl StationView for FakeView {
        fn render_label(&mut self, index: usize, frequency_label: &str, title: &str) {
            assert_eq!(index, self.labels.len());
            self.labels.push(format!("{} {}", frequency_label, title));
            self.active.push(false);
        }

        fn set_active(&mut self, index: usize, active: bool) {
            self.active[index] = active;
            self.updates += 1;
        }

        fn playback_failed(&mut self, index: usize, _reason: &str) {
            self.failures.push(index);
        }
    }

    impl FakeView {
        fn active_rows(&self) -> Vec<usize> {
            (0..self.active.len()).filter(|i| self.active[*i]).collect()
        }
    }

    fn stations(n: usize) -> Vec<Station> {
        (0..n)
            .map(|i| {
                Station::new(
                    &format!("FM {}", i),
                    "test",
                    vec![StreamSource::new(format!("http://radio/{}-mp3", i), None)],
                )
            })
            .collect()
    }

    fn controller(n: usize) -> (StationController<FakeView, FakeFactory>, Shared) {
        let backend: Shared = Rc::new(RefCell::new(Backend {
            playing: vec![false; n],
            ..Backend::default()
        }));
        let options = HandleOptions {
            transport: Transport::Streaming,
            volume: 0.5,
        };
        let ctl = StationController::new(
            stations(n),
            FakeView::default(),
            FakeFactory(backend.clone()),
            options,
        )
        .unwrap();
        (ctl, backend)
    }

    fn creates(backend: &Shared, index: usize) -> usize {
        backend
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == Call::Create(index))
            .count()
    }

    #[test]
    fn renders_every_label_on_construction() {
        let (ctl, _) = controller(3);
        assert_eq!(ctl.view().labels, vec!["FM 0 test", "FM 1 test", "FM 2 test"]);
        assert!(ctl.view().active_rows().is_empty());
    }

    #[test]
    fn empty_station_list_is_rejected() {
        let backend: Shared = Rc::new(RefCell::new(Backend::default()));
        let options = HandleOptions {
            transport: Transport::Streaming,
            volume: 0.5,
        };
        let res =
            StationController::new(vec![], FakeView::default(), FakeFactory(backend), options);
        assert!(matches!(res, Err(RadioError::Config(_))));
    }

    #[test]
    fn play_then_stop_leaves_nothing_active() {
        for i in 0..4 {
            let (mut ctl, _) = controller(4);
            ctl.play(Some(i)).unwrap();
            assert_eq!(ctl.view().active_rows(), vec![i]);
            ctl.stop();
            assert!(ctl.view().active_rows().is_empty());
            assert_eq!(ctl.state(i), Some(StationState::Stopped));
        }
    }

    #[test]
    fn replaying_stops_before_starting_again() {
        let (mut ctl, backend) = controller(3);
        ctl.play(Some(1)).unwrap();
        ctl.play(Some(1)).unwrap();

        let calls = backend.borrow().calls.clone();
        assert_eq!(calls, vec![Call::Create(1), Call::Play(1), Call::Stop(1), Call::Play(1)]);
        assert_eq!(ctl.view().active_rows(), vec![1]);
    }

    #[test]
    fn handle_is_created_once_per_station() {
        let (mut ctl, backend) = controller(2);
        ctl.play(Some(0)).unwrap();
        ctl.play(Some(1)).unwrap();
        ctl.play(Some(0)).unwrap();
        ctl.stop();
        ctl.play(None).unwrap();

        assert_eq!(creates(&backend, 0), 1);
        assert_eq!(creates(&backend, 1), 1);
    }

    #[test]
    fn play_without_index_uses_last_active() {
        let (mut ctl, backend) = controller(3);
        ctl.play(Some(2)).unwrap();
        ctl.stop();
        ctl.play(None).unwrap();

        assert_eq!(ctl.active_index(), 2);
        assert!(backend.borrow().playing[2]);
        assert_eq!(ctl.view().active_rows(), vec![2]);
    }

    #[test]
    fn out_of_range_play_changes_nothing() {
        let (mut ctl, backend) = controller(2);
        ctl.play(Some(1)).unwrap();
        let calls_before = backend.borrow().calls.len();
        let updates_before = ctl.view().updates;

        let err = ctl.play(Some(2)).unwrap_err();
        assert!(matches!(err, RadioError::InvalidIndex { index: 2, len: 2 }));
        assert_eq!(backend.borrow().calls.len(), calls_before);
        assert_eq!(ctl.view().updates, updates_before);
        assert_eq!(ctl.active_index(), 1);
        assert_eq!(ctl.state(1), Some(StationState::Playing));

        assert!(matches!(ctl.activate(7), Err(RadioError::InvalidIndex { .. })));
        assert_eq!(backend.borrow().calls.len(), calls_before);
    }

    #[test]
    fn stop_before_any_play_is_harmless() {
        let (mut ctl, backend) = controller(2);
        ctl.stop();
        ctl.stop();
        assert!(backend.borrow().calls.is_empty());
        assert!(ctl.view().active_rows().is_empty());
        assert_eq!(ctl.state(0), Some(StationState::Unloaded));
    }

    #[test]
    fn activating_the_playing_station_toggles_it_off() {
        let (mut ctl, backend) = controller(3);
        ctl.activate(1).unwrap();
        assert!(backend.borrow().playing[1]);

        ctl.activate(1).unwrap();
        assert!(!backend.borrow().playing[1]);
        assert!(ctl.view().active_rows().is_empty());
        assert_eq!(backend.borrow().calls.last(), Some(&Call::Stop(1)));
        assert_eq!(ctl.state(1), Some(StationState::Stopped));
    }

    #[test]
    fn activating_a_stopped_or_unloaded_station_switches_to_it() {
        let (mut ctl, backend) = controller(3);
        ctl.activate(0).unwrap();
        ctl.activate(0).unwrap(); // loaded, now stopped
        ctl.activate(2).unwrap(); // unloaded
        assert_eq!(ctl.view().active_rows(), vec![2]);

        ctl.activate(0).unwrap(); // loaded-but-stopped
        assert_eq!(ctl.view().active_rows(), vec![0]);
        let playing = backend.borrow().playing.clone();
        assert_eq!(playing, vec![true, false, false]);
    }

    #[test]
    fn two_station_click_scenario() {
        let (mut ctl, backend) = controller(2);

        ctl.activate(0).unwrap();
        assert_eq!(ctl.view().active_rows(), vec![0]);
        assert_eq!(creates(&backend, 0), 1);
        assert!(backend.borrow().playing[0]);

        ctl.activate(1).unwrap();
        assert_eq!(ctl.view().active_rows(), vec![1]);
        assert_eq!(creates(&backend, 1), 1);
        assert_eq!(backend.borrow().playing.clone(), vec![false, true]);
        assert_eq!(ctl.state(0), Some(StationState::Stopped));

        ctl.activate(1).unwrap();
        assert!(ctl.view().active_rows().is_empty());
        assert_eq!(backend.borrow().playing.clone(), vec![false, false]);
        assert_eq!(creates(&backend, 0), 1);
        assert_eq!(creates(&backend, 1), 1);
    }

    #[test]
    fn at_most_one_handle_plays_through_random_clicks() {
        let (mut ctl, backend) = controller(4);
        for index in [0, 3, 3, 1, 2, 2, 2, 0, 1, 1, 3] {
            ctl.activate(index).unwrap();
            let playing = backend.borrow().playing.iter().filter(|p| **p).count();
            assert!(playing <= 1);
            assert!(ctl.view().active_rows().len() <= 1);
        }
    }

    #[test]
    fn create_failure_keeps_bookkeeping_consistent() {
        let (mut ctl, backend) = controller(3);
        ctl.play(Some(0)).unwrap();
        backend.borrow_mut().refuse_create.push(2);

        let err = ctl.play(Some(2)).unwrap_err();
        assert!(matches!(err, RadioError::PlaybackFailure { index: 2, .. }));
        assert_eq!(ctl.active_index(), 2);
        assert_eq!(ctl.state(2), Some(StationState::Unloaded));
        assert_eq!(ctl.state(0), Some(StationState::Stopped));
        assert!(ctl.view().active_rows().is_empty());
        assert_eq!(ctl.view().failures, vec![2]);

        backend.borrow_mut().refuse_create.clear();
        ctl.activate(2).unwrap();
        assert_eq!(ctl.view().active_rows(), vec![2]);
    }

    #[test]
    fn play_failure_keeps_the_handle() {
        let (mut ctl, backend) = controller(2);
        backend.borrow_mut().refuse_play.push(1);

        assert!(ctl.activate(1).is_err());
        assert_eq!(ctl.state(1), Some(StationState::Stopped));
        assert!(ctl.view().active_rows().is_empty());

        backend.borrow_mut().refuse_play.clear();
        ctl.activate(1).unwrap();
        assert_eq!(creates(&backend, 1), 1);
        assert_eq!(ctl.state(1), Some(StationState::Playing));
    }

    #[test]
    fn reported_failure_clears_row_and_allows_restart() {
        let (mut ctl, backend) = controller(2);
        ctl.activate(0).unwrap();

        backend.borrow_mut().playing[0] = false; // stream died
        ctl.report_failure(0, "stream ended");
        assert_eq!(ctl.state(0), Some(StationState::Stopped));
        assert!(ctl.view().active_rows().is_empty());
        assert_eq!(ctl.view().failures, vec![0]);
        assert_eq!(ctl.active_index(), 0);

        ctl.activate(0).unwrap();
        assert_eq!(ctl.view().active_rows(), vec![0]);
    }

    #[test]
    fn stale_failure_reports_are_ignored() {
        let (mut ctl, _) = controller(2);
        ctl.activate(0).unwrap();

        // Handle still playing: the report belongs to an earlier session.
        ctl.report_failure(0, "old session");
        assert_eq!(ctl.state(0), Some(StationState::Playing));

        ctl.report_failure(1, "never loaded");
        ctl.report_failure(9, "out of range");
        assert_eq!(ctl.view().active_rows(), vec![0]);
        assert!(ctl.view().failures.is_empty());
    }

    #[test]
    fn volume_is_clamped_and_applied_to_loaded_handles() {
        let (mut ctl, backend) = controller(3);
        ctl.play(Some(0)).unwrap();
        ctl.play(Some(2)).unwrap();

        ctl.set_volume(5.0);
        assert_eq!(ctl.volume(), MAX_VOLUME);
        let calls = backend.borrow().calls.clone();
        assert!(calls.contains(&Call::Volume(0)));
        assert!(calls.contains(&Call::Volume(2)));
        assert!(!calls.contains(&Call::Volume(1)));

        ctl.set_volume(-1.0);
        assert_eq!(ctl.volume(), 0.0);
    }
}
