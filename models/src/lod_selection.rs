//! Screen-size based LOD selection and the per-instance dithered transition.

use redlilium_core::math::Vec3;
use redlilium_graphics::RenderView;

/// Transition byte value meaning "no transition running".
pub const LOD_TRANSITION_IDLE: u8 = 255;

/// Squared projected radius of a sphere, in the same units as LOD screen sizes.
pub fn screen_radius_squared(center: &Vec3, radius: f32, view: &RenderView) -> f32 {
    let p = &view.projection;
    let screen_multiple = 0.5 * p[(0, 0)].max(p[(1, 1)]);
    let screen_radius = screen_multiple * radius;
    let dist_sqr = (center - view.position).norm_squared() * p[(3, 2)].abs();
    screen_radius * screen_radius / dist_sqr.max(1.0)
}

/// Pick a LOD for a sphere: `-1` when it is smaller than `min_screen_size`,
/// otherwise the coarsest LOD whose threshold still covers the projected size.
pub fn compute_lod(
    screen_sizes: &[f32],
    min_screen_size: f32,
    center: &Vec3,
    radius: f32,
    view: &RenderView,
) -> i32 {
    let sr = screen_radius_squared(center, radius, view) * view.model_lod_distance_factor;
    let half = |size: f32| size * 0.5;
    if half(min_screen_size).powi(2) > sr {
        return -1;
    }
    match screen_sizes.len() {
        0 => -1,
        1 => 0,
        n => (0..n)
            .rev()
            .find(|&i| half(screen_sizes[i]).powi(2) >= sr)
            .map_or(0, |i| i as i32),
    }
}

/// Add the view and instance biases and clamp into `[highest_resident, lod_count - 1]`.
///
/// Returns `-1` for culled input or when no LOD is resident.
pub fn apply_lod_bias(lod: i32, bias: i32, lod_count: usize, highest_resident: usize) -> i32 {
    if lod < 0 || lod_count == 0 || highest_resident >= lod_count {
        return -1;
    }
    (lod + bias).clamp(highest_resident as i32, lod_count as i32 - 1)
}

/// One LOD draw with its signed dither factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodDraw {
    pub lod: usize,
    pub dither: f32,
}

/// Up to two draws emitted for an instance in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LodSubmission {
    draws: [Option<LodDraw>; 2],
}

impl LodSubmission {
    fn single(lod: i32, dither: f32) -> Self {
        let mut s = Self::default();
        s.push(lod, dither);
        s
    }

    fn push(&mut self, lod: i32, dither: f32) {
        let Ok(lod) = usize::try_from(lod) else {
            return;
        };
        if let Some(slot) = self.draws.iter_mut().find(|d| d.is_none()) {
            *slot = Some(LodDraw { lod, dither });
        }
    }

    pub fn draws(&self) -> impl Iterator<Item = LodDraw> + '_ {
        self.draws.iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.draws.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-instance LOD history driving the dithered crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodTransitionState {
    pub prev_lod: i8,
    pub prev_frame: u32,
    /// `0..=255` progress; [`LOD_TRANSITION_IDLE`] when idle.
    pub lod_transition: u8,
}

impl Default for LodTransitionState {
    fn default() -> Self {
        Self {
            prev_lod: -1,
            prev_frame: 0,
            lod_transition: LOD_TRANSITION_IDLE,
        }
    }
}

impl LodTransitionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_transitioning(&self) -> bool {
        self.lod_transition != LOD_TRANSITION_IDLE
    }

    fn progress(&self) -> f32 {
        self.lod_transition as f32 / 255.0
    }

    /// Advance the state for frame `frame` with the selected `lod` (`-1` when
    /// culled) and return what to draw.
    ///
    /// `single_frame` views draw without touching the state.
    pub fn update(&mut self, lod: i32, frame: u32, single_frame: bool, increment: u8) -> LodSubmission {
        if single_frame {
            return if lod < 0 {
                LodSubmission::default()
            } else {
                LodSubmission::single(lod, 0.0)
            };
        }

        let continuation = self.prev_frame.wrapping_add(1) == frame;

        if lod < 0 {
            let mut submission = LodSubmission::default();
            if continuation && self.prev_lod != -1 {
                if self.lod_transition == LOD_TRANSITION_IDLE {
                    self.lod_transition = 0;
                }
                self.lod_transition = self.lod_transition.saturating_add(increment);
                if self.lod_transition == LOD_TRANSITION_IDLE {
                    self.prev_lod = -1;
                } else {
                    submission.push(self.prev_lod as i32, self.progress());
                }
            }
            self.prev_frame = frame;
            return submission;
        }

        let l = lod as i8;
        if continuation {
            if self.prev_lod != l && self.lod_transition == LOD_TRANSITION_IDLE {
                self.lod_transition = 0;
            }
            self.lod_transition = self.lod_transition.saturating_add(increment);
            if self.lod_transition == LOD_TRANSITION_IDLE {
                self.prev_lod = l;
            }
        } else if frame.wrapping_sub(self.prev_frame.wrapping_add(1)) as i32 > 0 || self.prev_lod == -1 {
            self.prev_lod = l;
            self.lod_transition = LOD_TRANSITION_IDLE;
        }

        let submission = if self.prev_lod == l {
            LodSubmission::single(lod, 0.0)
        } else if self.prev_lod == -1 {
            LodSubmission::single(lod, 1.0 - self.progress())
        } else {
            let p = self.progress();
            let mut s = LodSubmission::single(self.prev_lod as i32, p);
            s.push(lod, p - 1.0);
            s
        };
        self.prev_frame = frame;
        submission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlilium_core::math::Mat4;
    use rstest::rstest;

    fn view() -> RenderView {
        let mut projection = Mat4::identity();
        projection[(3, 2)] = -1.0;
        projection[(3, 3)] = 0.0;
        RenderView::new(Vec3::zeros(), Mat4::identity(), projection)
    }

    /// Distance at which a unit sphere projects to `size` with this view.
    fn distance_for(size: f32) -> f32 {
        1.0 / size
    }

    #[rstest]
    #[case::coarse(0.18, 1)]
    #[case::fine(0.35, 0)]
    #[case::tiny(0.12, 1)]
    #[case::smallest(0.08, 2)]
    #[case::huge(2.0, 0)]
    fn picks_lod_by_screen_size(#[case] size: f32, #[case] expected: i32) {
        let center = Vec3::new(0.0, 0.0, -distance_for(size));
        assert_eq!(compute_lod(&[0.5, 0.25, 0.1], 0.0, &center, 1.0, &view()), expected);
    }

    #[test]
    fn below_min_screen_size_is_culled() {
        let center = Vec3::new(0.0, 0.0, -distance_for(0.05));
        assert_eq!(compute_lod(&[0.5, 0.25], 0.1, &center, 1.0, &view()), -1);
    }

    #[test]
    fn lod_is_non_increasing_in_radius() {
        let center = Vec3::new(0.0, 0.0, -20.0);
        let sizes = [0.6, 0.3, 0.15, 0.05];
        let mut previous = i32::MAX;
        for step in 1..200 {
            let lod = compute_lod(&sizes, 0.0, &center, step as f32 * 0.1, &view());
            assert!(lod <= previous);
            previous = lod;
        }
    }

    #[rstest]
    #[case::culled(-1, 0, 3, 0, -1)]
    #[case::bias_up(0, 1, 3, 0, 1)]
    #[case::clamped_top(2, 5, 3, 0, 2)]
    #[case::resident_floor(0, 0, 3, 2, 2)]
    #[case::nothing_resident(0, 0, 3, 3, -1)]
    fn bias_and_residency(
        #[case] lod: i32,
        #[case] bias: i32,
        #[case] count: usize,
        #[case] highest: usize,
        #[case] expected: i32,
    ) {
        assert_eq!(apply_lod_bias(lod, bias, count, highest), expected);
    }

    #[test]
    fn first_frame_snaps_without_transition() {
        let mut state = LodTransitionState::new();
        let draws: Vec<_> = state.update(1, 0, false, 32).draws().collect();
        assert_eq!(draws, vec![LodDraw { lod: 1, dither: 0.0 }]);
        assert_eq!(state.prev_lod, 1);
        assert!(!state.is_transitioning());
    }

    #[test]
    fn crossfade_dithers_sum_to_one() {
        let mut state = LodTransitionState::new();
        state.update(1, 0, false, 32);
        for frame in 1..8 {
            let draws: Vec<_> = state.update(0, frame, false, 32).draws().collect();
            assert_eq!(draws.len(), 2);
            let sum: f32 = draws.iter().map(|d| d.dither.abs()).sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert_eq!(draws[0].lod, 1);
            assert_eq!(draws[1].lod, 0);
        }
        let draws: Vec<_> = state.update(0, 8, false, 32).draws().collect();
        assert_eq!(draws, vec![LodDraw { lod: 0, dither: 0.0 }]);
        assert_eq!(state.prev_lod, 0);
        assert_eq!(state.lod_transition, LOD_TRANSITION_IDLE);
    }

    #[test]
    fn skipped_frames_reset_the_state() {
        let mut state = LodTransitionState::new();
        state.update(1, 0, false, 32);
        state.update(0, 1, false, 32);
        assert!(state.is_transitioning());
        let draws: Vec<_> = state.update(0, 10, false, 32).draws().collect();
        assert_eq!(draws, vec![LodDraw { lod: 0, dither: 0.0 }]);
        assert!(!state.is_transitioning());
    }

    #[test]
    fn single_frame_views_leave_state_alone() {
        let mut state = LodTransitionState::new();
        state.update(1, 0, false, 32);
        let before = state;
        let draws: Vec<_> = state.update(0, 1, true, 32).draws().collect();
        assert_eq!(draws, vec![LodDraw { lod: 0, dither: 0.0 }]);
        assert_eq!(state, before);
    }

    #[test]
    fn single_frame_views_do_not_fade_out() {
        let mut state = LodTransitionState::new();
        state.update(2, 0, false, 32);
        let before = state;
        assert!(state.update(-1, 1, true, 32).is_empty());
        assert_eq!(state, before);
        assert_eq!(state.prev_lod, 2);
        assert!(!state.is_transitioning());
    }

    #[test]
    fn fade_out_keeps_drawing_previous_lod() {
        let mut state = LodTransitionState::new();
        state.update(2, 0, false, 128);
        let draws: Vec<_> = state.update(-1, 1, false, 128).draws().collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].lod, 2);
        assert!((draws[0].dither - 128.0 / 255.0).abs() < 1e-6);
        assert!(state.update(-1, 2, false, 128).is_empty());
        assert_eq!(state.prev_lod, -1);
        assert!(state.update(-1, 3, false, 128).is_empty());
    }

    #[test]
    fn oscillation_never_stalls_on_mismatched_lods() {
        let mut state = LodTransitionState::new();
        let mut stalled = 0;
        for frame in 0..200u32 {
            let lod = ((frame / 3) % 2) as i32;
            let submission = state.update(lod, frame, false, 32);
            let single_no_dither =
                submission.len() == 1 && submission.draws().all(|d| d.dither == 0.0);
            if single_no_dither && state.prev_lod as i32 != lod {
                stalled += 1;
            } else {
                stalled = 0;
            }
            assert!(stalled < 2);
        }
    }
}
