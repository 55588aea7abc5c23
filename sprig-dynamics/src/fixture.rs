use sprig_collision::{ProxyId, Shape};
use sprig_core::{BodyId, Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Collision filtering by category, mask and group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Filter {
    /// Categories this fixture belongs to
    pub category_bits: u16,
    /// Categories this fixture collides with
    pub mask_bits: u16,
    /// Fixtures sharing a non-zero group always collide if positive, or never if negative
    pub group_index: i16,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            category_bits: 0x0001,
            mask_bits: 0xFFFF,
            group_index: 0,
        }
    }
}

impl Filter {
    pub fn new(category_bits: u16, mask_bits: u16) -> Self {
        Self {
            category_bits,
            mask_bits,
            group_index: 0,
        }
    }

    pub fn with_group_index(mut self, group_index: i16) -> Self {
        self.group_index = group_index;
        self
    }

    pub fn should_collide(&self, other: &Filter) -> bool {
        if self.group_index == other.group_index && self.group_index != 0 {
            return self.group_index > 0;
        }

        (self.mask_bits & other.category_bits) != 0 && (other.mask_bits & self.category_bits) != 0
    }
}

/// Material and filtering of a fixture to be created
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixtureConf {
    pub friction: f32,
    pub restitution: f32,
    /// Mass per square meter
    pub density: f32,
    pub is_sensor: bool,
    pub filter: Filter,
}

impl Default for FixtureConf {
    fn default() -> Self {
        Self {
            friction: 0.2,
            restitution: 0.0,
            density: 0.0,
            is_sensor: false,
            filter: Filter::default(),
        }
    }
}

impl FixtureConf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_sensor(mut self, is_sensor: bool) -> Self {
        self.is_sensor = is_sensor;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_friction(self.friction)?;
        validate_restitution(self.restitution)?;

        if !(self.density >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "density must be non-negative, got {}",
                self.density
            )));
        }

        Ok(())
    }
}

pub(crate) fn validate_friction(friction: f32) -> Result<()> {
    if !(friction >= 0.0) {
        return Err(Error::invalid_argument(format!(
            "friction must be non-negative, got {friction}"
        )));
    }

    Ok(())
}

pub(crate) fn validate_restitution(restitution: f32) -> Result<()> {
    if restitution.is_nan() {
        return Err(Error::invalid_argument("restitution is NaN"));
    }

    Ok(())
}

/// Attaches a shape to a body.
///
/// Each child of the shape is represented by one proxy in the broad phase while the body is
/// enabled and the world has stepped since the fixture was created.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub(crate) body: BodyId,
    pub(crate) shape: Shape,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) density: f32,
    pub(crate) is_sensor: bool,
    pub(crate) filter: Filter,
    pub(crate) proxies: Vec<ProxyId>,
}

impl Fixture {
    pub(crate) fn new(body: BodyId, shape: Shape, conf: &FixtureConf) -> Self {
        Self {
            body,
            shape,
            friction: conf.friction,
            restitution: conf.restitution,
            density: conf.density,
            is_sensor: conf.is_sensor,
            filter: conf.filter,
            proxies: Vec::new(),
        }
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Broad phase proxies, indexed by child
    pub fn proxies(&self) -> &[ProxyId] {
        &self.proxies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtering() {
        let a = Filter::default();
        let b = Filter::default();
        assert!(a.should_collide(&b));

        let player = Filter::new(0b01, 0b10);
        let enemy = Filter::new(0b10, 0b01);
        let ghost = Filter::new(0b100, 0b100);
        assert!(player.should_collide(&enemy));
        assert!(!player.should_collide(&ghost));
        assert!(!ghost.should_collide(&player));

        // Groups override the masks
        assert!(ghost
            .with_group_index(3)
            .should_collide(&player.with_group_index(3)));
        assert!(!a.with_group_index(-1).should_collide(&b.with_group_index(-1)));
        assert!(a.with_group_index(-1).should_collide(&b.with_group_index(-2)));
    }

    #[test]
    fn material_validation() {
        assert!(FixtureConf::new().validate().is_ok());
        assert!(FixtureConf::new().with_friction(-0.1).validate().is_err());
        assert!(FixtureConf::new().with_friction(f32::NAN).validate().is_err());
        assert!(FixtureConf::new()
            .with_restitution(f32::NAN)
            .validate()
            .is_err());
        assert!(FixtureConf::new().with_density(-1.0).validate().is_err());
        assert!(FixtureConf::new().with_restitution(-2.0).validate().is_ok());
    }
}
