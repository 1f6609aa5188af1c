// src/profiler.rs
//
// Frame-loop timings and clipmap counters, averaged and logged periodically.

use std::time::{Duration, Instant};

use crate::clipmap::UpdateStats;

pub struct FrameProf {
    enabled: bool,

    pub frame: u64,
    pub last_print: Instant,
    pub print_every: Duration,

    pub n_frames: u64,
    pub t_edit: f64,
    pub t_update: f64,
    pub t_bind: f64,
    pub t_poll: f64,
    pub max_frame_ms: f64,
    pub max_update_ms: f64,

    pub clip: UpdateStats,
    pub edits: u64,
}

impl FrameProf {
    pub fn new(enabled: bool, print_every: Duration) -> Self {
        Self {
            enabled,

            frame: 0,
            last_print: Instant::now(),
            print_every,

            n_frames: 0,
            t_edit: 0.0,
            t_update: 0.0,
            t_bind: 0.0,
            t_poll: 0.0,
            max_frame_ms: 0.0,
            max_update_ms: 0.0,

            clip: UpdateStats::default(),
            edits: 0,
        }
    }

    #[inline]
    pub fn start(&self) -> Option<Instant> {
        if self.enabled {
            Some(Instant::now())
        } else {
            None
        }
    }

    #[inline]
    pub fn end_ms(t0: Option<Instant>) -> f64 {
        match t0 {
            Some(t) => t.elapsed().as_secs_f64() * 1000.0,
            None => 0.0,
        }
    }

    #[inline]
    pub fn edit(&mut self, ms: f64) {
        if self.enabled {
            self.t_edit += ms;
            self.edits += 1;
        }
    }

    #[inline]
    pub fn update(&mut self, ms: f64, stats: UpdateStats) {
        if self.enabled {
            self.t_update += ms;
            self.max_update_ms = self.max_update_ms.max(ms);
            self.clip += stats;
        }
    }

    #[inline]
    pub fn bind(&mut self, ms: f64) {
        if self.enabled {
            self.t_bind += ms;
        }
    }

    #[inline]
    pub fn poll(&mut self, ms: f64) {
        if self.enabled {
            self.t_poll += ms;
        }
    }

    /// Close the frame; logs and resets the window once `print_every` has passed.
    /// Returns true when it logged.
    pub fn end_frame(&mut self, frame_ms: f64) -> bool {
        if !self.enabled {
            return false;
        }

        self.frame += 1;
        self.n_frames += 1;
        self.max_frame_ms = self.max_frame_ms.max(frame_ms);

        if self.last_print.elapsed() < self.print_every {
            return false;
        }

        let nf = self.n_frames.max(1) as f64;
        let avg = |x: f64| x / nf;
        let per = |x: u64| x as f64 / nf;

        log::info!(
            concat!(
                "[prof] frames={} max_frame={:.2}ms | edit={:.2} update={:.2} (max {:.2}) bind={:.2} poll={:.2}\n",
                "  clip/frame: levels={:.2} texels={:.0} rows={:.1} kb={:.1} copies={:.2} dispatches={:.2} waits={:.2} | edits={}",
            ),
            self.frame,
            self.max_frame_ms,
            avg(self.t_edit),
            avg(self.t_update),
            self.max_update_ms,
            avg(self.t_bind),
            avg(self.t_poll),
            per(self.clip.levels_updated as u64),
            per(self.clip.texels_staged),
            per(self.clip.rows_flushed),
            per(self.clip.bytes_flushed) / 1024.0,
            per(self.clip.copies as u64),
            per(self.clip.normal_dispatches as u64),
            per(self.clip.staging_waits as u64),
            self.edits,
        );

        self.last_print = Instant::now();
        self.n_frames = 0;
        self.t_edit = 0.0;
        self.t_update = 0.0;
        self.t_bind = 0.0;
        self.t_poll = 0.0;
        self.max_frame_ms = 0.0;
        self.max_update_ms = 0.0;
        self.clip = UpdateStats::default();
        self.edits = 0;
        true
    }
}

/// `--profile` enables the profiler; `--profile-every-ms N` sets the window.
pub fn settings_from_args<I: IntoIterator<Item = String>>(args: I) -> (bool, Duration) {
    let mut enabled = false;
    let mut every_ms: Option<u64> = None;

    let mut it = args.into_iter();
    while let Some(a) = it.next() {
        if a == "--profile" || a == "--profiling" {
            enabled = true;
            continue;
        }

        if let Some(v) = a.strip_prefix("--profile-every-ms=") {
            if let Ok(n) = v.parse::<u64>() {
                every_ms = Some(n);
            }
            continue;
        }

        if a == "--profile-every-ms" {
            if let Some(v) = it.next() {
                if let Ok(n) = v.parse::<u64>() {
                    every_ms = Some(n);
                }
            }
            continue;
        }
    }

    (enabled, Duration::from_millis(every_ms.unwrap_or(500)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_profile_flags() {
        assert_eq!(settings_from_args(args(&[])), (false, Duration::from_millis(500)));
        assert_eq!(
            settings_from_args(args(&["--profile", "--profile-every-ms", "250"])),
            (true, Duration::from_millis(250))
        );
        assert_eq!(
            settings_from_args(args(&["--profile-every-ms=40", "--profiling"])),
            (true, Duration::from_millis(40))
        );
    }

    #[test]
    fn disabled_profiler_records_nothing() {
        let mut p = FrameProf::new(false, Duration::ZERO);
        assert!(p.start().is_none());
        p.update(3.0, UpdateStats { copies: 4, ..Default::default() });
        assert!(!p.end_frame(1.0));
        assert_eq!(p.clip, UpdateStats::default());
    }

    #[test]
    fn window_resets_after_logging() {
        let mut p = FrameProf::new(true, Duration::ZERO);
        p.update(2.0, UpdateStats { copies: 2, texels_staged: 100, ..Default::default() });
        p.edit(0.5);
        assert!(p.end_frame(4.0));
        assert_eq!(p.n_frames, 0);
        assert_eq!(p.clip, UpdateStats::default());
        assert_eq!(p.edits, 0);
        assert_eq!(p.frame, 1);
    }
}
