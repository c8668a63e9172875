/*
 *  detector.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use std::time::Duration;

use crate::metadata::{ArtworkValidator, TrackMetadata};

/// Outcome of a change check, every trigger kept for the cycle log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateDecision {
    pub needs_update: bool,
    pub song_changed: bool,
    pub artwork_changed: bool,
    pub force_refresh: bool,
    pub first_run: bool,
}

impl UpdateDecision {
    /// Any trigger that does not need a network round trip.
    pub fn has_cheap_trigger(&self) -> bool {
        self.song_changed || self.force_refresh || self.first_run
    }

    pub fn reason(&self) -> &'static str {
        if self.first_run {
            "first_run"
        } else if self.song_changed {
            "song_changed"
        } else if self.artwork_changed {
            "artwork_changed"
        } else if self.force_refresh {
            "force_refresh"
        } else {
            "unchanged"
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    pub force_refresh_interval: Duration,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        ChangeDetector { force_refresh_interval: Duration::from_secs(300) }
    }
}

impl ChangeDetector {
    pub fn new(force_refresh_interval: Duration) -> Self {
        ChangeDetector { force_refresh_interval }
    }

    /// Song, force refresh and first run triggers only.
    pub fn cheap_triggers(
        &self,
        observed: &TrackMetadata,
        displayed: &TrackMetadata,
        elapsed_since_last_image: Duration,
        is_first_run: bool,
    ) -> UpdateDecision {
        let song_changed = observed != displayed;
        let force_refresh = elapsed_since_last_image > self.force_refresh_interval;
        UpdateDecision {
            needs_update: song_changed || force_refresh || is_first_run,
            song_changed,
            artwork_changed: false,
            force_refresh,
            first_run: is_first_run,
        }
    }

    /// Full decision. `validator_now` is `None` when the HEAD was skipped or
    /// failed; an unknown validator never counts as a change.
    pub fn needs_update(
        &self,
        observed: &TrackMetadata,
        displayed: &TrackMetadata,
        validator_now: Option<&ArtworkValidator>,
        validator_last: &ArtworkValidator,
        elapsed_since_last_image: Duration,
        is_first_run: bool,
    ) -> UpdateDecision {
        let mut decision = self.cheap_triggers(observed, displayed, elapsed_since_last_image, is_first_run);
        decision.artwork_changed = validator_now.is_some_and(|now| now.differs_from(validator_last));
        decision.needs_update |= decision.artwork_changed;
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORCE: Duration = Duration::from_secs(300);

    fn detector() -> ChangeDetector {
        ChangeDetector::new(FORCE)
    }

    #[test]
    fn test_equal_metadata_is_not_a_song_change() {
        let a = TrackMetadata::new("A", "X", "");
        let d = detector().cheap_triggers(&a, &a.clone(), Duration::from_secs(10), false);
        assert!(!d.song_changed);
        assert!(!d.needs_update);
    }

    #[test]
    fn test_any_single_field_is_a_song_change() {
        let base = TrackMetadata::new("A", "X", "L");
        let variants = [
            TrackMetadata::new("B", "X", "L"),
            TrackMetadata::new("A", "Y", "L"),
            TrackMetadata::new("A", "X", "M"),
            TrackMetadata::new("a", "X", "L"),
            TrackMetadata::new("A", "X", ""),
        ];
        for v in variants.iter() {
            let d = detector().cheap_triggers(v, &base, Duration::from_secs(1), false);
            assert!(d.song_changed, "{:?} vs {:?}", v, base);
            assert!(d.needs_update);
        }
    }

    #[test]
    fn test_first_run_always_updates() {
        let a = TrackMetadata::new("A", "X", "");
        let v = ArtworkValidator::new("T1", "500");
        let d = detector().needs_update(&a, &a, Some(&v), &v, Duration::ZERO, true);
        assert!(d.needs_update);
        assert!(d.first_run);
        assert_eq!(d.reason(), "first_run");
    }

    #[test]
    fn test_nothing_changed_scenario() {
        let observed = TrackMetadata::new("A", "X", "");
        let displayed = TrackMetadata::new("A", "X", "");
        let v = ArtworkValidator::new("T1", "500");
        let d = detector().needs_update(&observed, &displayed, Some(&v), &v.clone(), Duration::from_secs(10), false);
        assert!(!d.needs_update);
        assert!(!d.song_changed);
        assert_eq!(d.reason(), "unchanged");
    }

    #[test]
    fn test_force_refresh_scenario() {
        let observed = TrackMetadata::new("A", "X", "");
        let v = ArtworkValidator::new("T1", "500");
        let elapsed = FORCE + Duration::from_secs(1);
        let d = detector().needs_update(&observed, &observed.clone(), Some(&v), &v, elapsed, false);
        assert!(d.needs_update);
        assert!(!d.song_changed);
        assert!(d.force_refresh);

        // exactly at the ceiling is not yet over it
        let d = detector().needs_update(&observed, &observed.clone(), Some(&v), &v, FORCE, false);
        assert!(!d.force_refresh);
    }

    #[test]
    fn test_content_length_change_is_artwork_change() {
        let md = TrackMetadata::new("A", "X", "");
        let last = ArtworkValidator::new("T1", "500");
        let now = ArtworkValidator::new("T1", "600");
        let d = detector().needs_update(&md, &md, Some(&now), &last, Duration::from_secs(5), false);
        assert!(d.artwork_changed);
        assert!(d.needs_update);
        assert!(!d.song_changed);
        assert_eq!(d.reason(), "artwork_changed");
    }

    #[test]
    fn test_unknown_validator_is_not_a_change() {
        let md = TrackMetadata::new("A", "X", "");
        let last = ArtworkValidator::new("T1", "500");
        let d = detector().needs_update(&md, &md, None, &last, Duration::from_secs(5), false);
        assert!(!d.artwork_changed);
        assert!(!d.needs_update);
    }
}
