//! Intended-target inference for shots that hit terrain or a structure
//!
//! The shooter's position and the shot's terminal point define a ray. Every
//! eligible opponent is modelled as a sphere whose radius grows with distance
//! from the shooter, and the nearest sphere the ray enters in front of the
//! shooter is taken as the intended target.

use crate::domain::error::EtlResult;
use crate::domain::geometry::{Ray, Sphere, Vec3};
use crate::domain::types::{PlayerId, ShotEvent};
use crate::io::roster::TeamLookup;
use tracing::trace;

/// Hit-sphere sizing and range limits, in centimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitboxModel {
    pub base_radius: f64,
    /// Radius added per meter of distance from the shooter
    pub growth_per_m: f64,
    /// Intersections at or beyond this ray parameter are ignored
    pub max_range: f64,
}

impl HitboxModel {
    pub const DEFAULT_BASE_RADIUS: f64 = 200.0; // 2m
    pub const DEFAULT_GROWTH_PER_M: f64 = 0.5; // +0.5cm per meter
    pub const DEFAULT_MAX_RANGE: f64 = 25_000.0; // 250m

    #[inline]
    pub fn radius_at(&self, distance_cm: f64) -> f64 {
        self.base_radius + self.growth_per_m * (distance_cm / 100.0)
    }
}

impl Default for HitboxModel {
    fn default() -> Self {
        Self {
            base_radius: Self::DEFAULT_BASE_RADIUS,
            growth_per_m: Self::DEFAULT_GROWTH_PER_M,
            max_range: Self::DEFAULT_MAX_RANGE,
        }
    }
}

/// An opponent's position at the time of the shot
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: PlayerId,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    /// The shot already names the player it hit
    Direct,
    /// Intended target inferred from geometry
    Hit { target: PlayerId, position: Vec3, distance: f64 },
    /// No eligible candidate, or the nearest one stood behind the structure that was hit
    Stray,
}

#[derive(Debug, Clone, Default)]
pub struct TargetInference {
    model: HitboxModel,
}

impl TargetInference {
    pub fn new(model: HitboxModel) -> Self {
        Self { model }
    }

    /// Infer the intended recipient of `shot` fired from `origin`.
    ///
    /// Candidates equal to the shooter or on the shooter's team are ignored.
    /// Among intersected spheres the one closest to the shooter wins; equal
    /// distances keep the earlier candidate. Fails with `DegenerateGeometry`
    /// when the impact point coincides with the origin.
    pub fn infer(
        &self,
        shot: &ShotEvent,
        origin: Vec3,
        candidates: &[Candidate],
        teams: &dyn TeamLookup,
    ) -> EtlResult<Inference> {
        if shot.hit_player.is_some() {
            return Ok(Inference::Direct);
        }

        let ray = Ray::between(origin, shot.impact)?;
        let mut best: Option<(&Candidate, f64)> = None;

        for candidate in candidates {
            if candidate.id == shot.player || teams.same_team(&shot.player, &candidate.id) {
                continue;
            }
            let distance = origin.distance(candidate.position);
            let sphere = Sphere::new(candidate.position, self.model.radius_at(distance));
            if sphere.near_hit(&ray, self.model.max_range).is_none() {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }

        let Some((candidate, distance)) = best else {
            return Ok(Inference::Stray);
        };

        let impact_distance = origin.distance(shot.impact);
        if shot.hit_structure && distance >= impact_distance {
            trace!(
                shooter = %shot.player,
                candidate = %candidate.id,
                distance_cm = %distance,
                impact_cm = %impact_distance,
                "candidate_behind_structure"
            );
            return Ok(Inference::Stray);
        }

        Ok(Inference::Hit {
            target: candidate.id.clone(),
            position: candidate.position,
            distance,
        })
    }
}
