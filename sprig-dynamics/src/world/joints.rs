use glam::Vec2;
use sprig_core::{BodyId, EntityKind, Error, JointId, Result};

use crate::{Joint, JointConf};

use super::World;

impl World {
    /// Creates a joint between the bodies named by `conf`.
    ///
    /// Unless the joint collides connected, contacts between its two bodies are filtered out
    /// during the next step.
    pub fn create_joint(&mut self, conf: impl Into<JointConf>) -> Result<JointId> {
        let conf = conf.into();
        self.check_unlocked()?;

        if self.joint_list.len() >= self.conf.max_joints {
            return Err(Error::CapacityExceeded {
                kind: EntityKind::Joint,
                max: self.conf.max_joints,
            });
        }

        let joint = Joint::new(&conf, &self.joints, &self.bodies)?;

        for body in joint.bodies() {
            if !self.bodies.contains(body) {
                return Err(Error::invalid_argument(format!(
                    "{:?} joint references missing body {body}",
                    joint.kind()
                )));
            }
        }

        let body_a = joint.body_a();
        let body_b = joint.body_b();
        if body_a == Some(body_b) {
            return Err(Error::invalid_argument(format!(
                "{:?} joint connects body {body_b} to itself",
                joint.kind()
            )));
        }

        let collide_connected = joint.collide_connected();
        let id = self.joints.allocate(joint);
        self.joint_list.push(id);

        if let Some(a) = body_a {
            self.bodies[a].joints.push((id, Some(body_b)));
        }

        self.bodies[body_b].joints.push((id, body_a));

        if let (Some(a), false) = (body_a, collide_connected) {
            self.flag_contacts_for_filtering(a, body_b);
        }

        tracing::debug!(%id, kind = ?conf.kind(), "created joint");
        Ok(id)
    }

    /// Destroys a joint, waking its bodies.
    ///
    /// Gear joints driven by the joint are destroyed as well, notifying the destruction listener.
    pub fn destroy_joint(&mut self, id: JointId) -> Result<()> {
        self.check_unlocked()?;
        self.joint(id)?;

        self.destroy_joint_internal(id);
        Ok(())
    }

    /// Returns a joint for modification, waking the bodies it acts on
    pub fn joint_mut(&mut self, id: JointId) -> Result<&mut Joint> {
        self.check_unlocked()?;
        let bodies = self.joint(id)?.bodies();
        for body in bodies {
            self.bodies[body].set_awake();
        }

        Ok(&mut self.joints[id])
    }

    /// World space anchors of a joint on body A and body B.
    ///
    /// Joints without a body A, such as the target joint, report their world space anchor as is.
    pub fn joint_anchors(&self, id: JointId) -> Result<(Vec2, Vec2)> {
        let joint = self.joint(id)?;

        let anchor_a = match joint.body_a() {
            Some(body) => self.bodies[body].world_point(joint.local_anchor_a()),
            None => joint.local_anchor_a(),
        };

        let anchor_b = self.bodies[joint.body_b()].world_point(joint.local_anchor_b());

        Ok((anchor_a, anchor_b))
    }

    pub(crate) fn notify_joint_destroyed(&mut self, id: JointId) {
        if let Some(listener) = self.destruction_listener.as_deref_mut() {
            listener.joint(id);
        }
    }

    pub(crate) fn destroy_joint_internal(&mut self, id: JointId) {
        let Some(joint) = self.joints.free(id) else {
            return;
        };

        self.joint_list.retain(|&v| v != id);

        let body_a = joint.body_a();
        let body_b = joint.body_b();

        for body in body_a.into_iter().chain([body_b]) {
            let body = &mut self.bodies[body];
            body.joints.retain(|v| v.0 != id);
            body.set_awake();
        }

        // Pair the bodies again since contacts between them were never created
        if body_a.is_some() && !joint.collide_connected() {
            let fixtures = self.bodies[body_b].fixtures.clone();
            for fixture in fixtures {
                self.touch_proxies(fixture);
            }
        }

        tracing::debug!(%id, kind = ?joint.kind(), "destroyed joint");

        let gears: Vec<_> = self
            .joint_list
            .iter()
            .copied()
            .filter(|&v| {
                self.joints[v]
                    .as_gear()
                    .is_some_and(|gear| {
                        let (joint1, joint2) = gear.joints();
                        joint1 == id || joint2 == id
                    })
            })
            .collect();

        for gear in gears {
            self.notify_joint_destroyed(gear);
            self.destroy_joint_internal(gear);
        }
    }

    /// Flags the contacts between `a` and `b` for filtering
    pub(crate) fn flag_contacts_for_filtering(&mut self, a: BodyId, b: BodyId) {
        for &(_, contact) in &self.bodies[b].contacts {
            let contact = &mut self.contacts[contact];
            if contact.other_body(b) == a {
                contact.flag_for_filtering();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::vec2;
    use sprig_collision::Disk;

    use crate::{
        joint::{DistanceJointConf, GearJointConf, RevoluteJointConf},
        BodyConf, FixtureConf, StepConf,
    };

    use super::*;

    #[test]
    fn rejects_missing_bodies() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        let b = world.create_body(&BodyConf::dynamic()).unwrap();
        world.destroy_body(b).unwrap();

        assert!(matches!(
            world.create_joint(DistanceJointConf::new(a, b)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            world.create_joint(DistanceJointConf::new(a, a)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(world.joint_count(), 0);
    }

    #[test]
    fn attaches_to_both_bodies() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        let b = world.create_body(&BodyConf::dynamic()).unwrap();

        let joint = world.create_joint(RevoluteJointConf::new(a, b)).unwrap();
        assert_eq!(world.body(a).unwrap().joints(), [(joint, Some(b))]);
        assert_eq!(world.body(b).unwrap().joints(), [(joint, Some(a))]);

        world.destroy_joint(joint).unwrap();
        assert!(world.body(a).unwrap().joints().is_empty());
        assert!(world.body(b).unwrap().joints().is_empty());
        assert!(world.joint(joint).is_err());
    }

    #[test]
    fn connected_bodies_do_not_collide() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::dynamic()).unwrap();
        world
            .create_fixture(a, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.5, 0.0)))
            .unwrap();
        world
            .create_fixture(b, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 1);

        let joint = world.create_joint(RevoluteJointConf::new(a, b)).unwrap();
        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 0);

        world.destroy_joint(joint).unwrap();
        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 1);
    }

    #[test]
    fn destroying_body_cascades_to_gears() {
        crate::init_logging();
        let mut world = World::default();
        let ground = world.create_body(&BodyConf::default()).unwrap();
        let a = world.create_body(&BodyConf::dynamic()).unwrap();
        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(2.0, 0.0)))
            .unwrap();

        let j1 = world.create_joint(RevoluteJointConf::new(ground, a)).unwrap();
        let j2 = world
            .create_joint(RevoluteJointConf::new(ground, b).with_local_anchors(vec2(2.0, 0.0), vec2(0.0, 0.0)))
            .unwrap();
        let gear = world.create_joint(GearJointConf::new(j1, j2)).unwrap();
        assert_eq!(world.joint_count(), 3);

        world.destroy_body(a).unwrap();
        assert!(world.joint(j1).is_err());
        assert!(world.joint(gear).is_err());
        assert!(world.joint(j2).is_ok());
        assert_eq!(world.joint_count(), 1);
    }

    #[test]
    fn anchors_follow_bodies() {
        crate::init_logging();
        let mut world = World::default();
        let a = world.create_body(&BodyConf::default()).unwrap();
        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(1.0, 2.0)))
            .unwrap();

        let joint = world
            .create_joint(DistanceJointConf::new(a, b).with_local_anchors(vec2(0.0, 1.0), vec2(0.5, 0.0)))
            .unwrap();

        let (anchor_a, anchor_b) = world.joint_anchors(joint).unwrap();
        assert_eq!(anchor_a, vec2(0.0, 1.0));
        assert_eq!(anchor_b, vec2(1.5, 2.0));
    }
}
