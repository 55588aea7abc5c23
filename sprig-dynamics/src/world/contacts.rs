use std::ops::ControlFlow;

use itertools::Itertools;
use sprig_collision::{collide_shapes, test_overlap, Manifold, ManifoldConf};
use sprig_core::{BodyId, ContactId, FixtureId};

use crate::{mix_friction, mix_restitution, Contact, ContactFlags, ContactKey, StepConf};

use super::World;

/// Outcome of updating the manifolds of every contact
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct ContactUpdates {
    pub ignored: u32,
    pub updated: u32,
    pub skipped: u32,
}

impl World {
    /// Destroys contacts whose proxies no longer overlap or which no longer pass filtering
    pub(super) fn destroy_contacts(&mut self) -> u32 {
        let mut doomed = Vec::new();

        for &(_, id) in &self.contact_list {
            let contact = &self.contacts[id];

            if contact.needs_filtering() {
                let (a, b) = (contact.fixture_a, contact.fixture_b);
                if !self.should_collide(a, b) {
                    doomed.push(id);
                    continue;
                }

                self.contacts[id].flags -= ContactFlags::NEEDS_FILTERING;
            }

            let contact = &self.contacts[id];
            let proxy_a = self.fixtures[contact.fixture_a].proxies.get(contact.child_a);
            let proxy_b = self.fixtures[contact.fixture_b].proxies.get(contact.child_b);

            let overlaps = match (
                proxy_a.and_then(|&p| self.tree.aabb(p)),
                proxy_b.and_then(|&p| self.tree.aabb(p)),
            ) {
                (Some(a), Some(b)) => a.overlaps(&b),
                _ => false,
            };

            if !overlaps {
                doomed.push(id);
            }
        }

        self.destroy_contact_set(&doomed)
    }

    /// Destroys a single contact
    pub(super) fn destroy_contact(&mut self, id: ContactId) {
        if self.release_contact(id) {
            self.contact_list.retain(|v| v.1 != id);
        }
    }

    /// Destroys every contact in `ids`, removing them from the contact list in a single pass
    pub(super) fn destroy_contact_set(&mut self, ids: &[ContactId]) -> u32 {
        if ids.is_empty() {
            return 0;
        }

        self.marks.contacts.reset(self.contacts.size());

        let mut count = 0;
        for &id in ids {
            if self.release_contact(id) {
                self.marks.contacts.set(id);
                count += 1;
            }
        }

        let marks = &self.marks.contacts;
        self.contact_list.retain(|v| !marks.get(v.1));

        count
    }

    /// Notifies the end of touching, then frees the contact and unlinks it from its bodies.
    ///
    /// Both bodies are woken if the contact had points. The contact list is left to the caller.
    fn release_contact(&mut self, id: ContactId) -> bool {
        let Some(contact) = self.contacts.get(id) else {
            return false;
        };

        if contact.is_touching() {
            if let Some(listener) = self.contact_listener.as_deref_mut() {
                listener.end_contact(id, contact);
            }
        }

        let Some(contact) = self.contacts.free(id) else {
            return false;
        };

        let manifold = self.manifolds.free(id).unwrap_or_default();

        for body in [contact.body_a, contact.body_b] {
            let body = &mut self.bodies[body];
            if let Some(index) = body.contacts.iter().position(|v| v.1 == id) {
                body.contacts.swap_remove(index);
            }

            if manifold.point_count() > 0 && !contact.is_sensor() {
                body.set_awake();
            }
        }

        true
    }

    pub(super) fn destroy_body_contacts(&mut self, body: BodyId) {
        let contacts: Vec<_> = self.bodies[body].contacts.iter().map(|v| v.1).collect();
        self.destroy_contact_set(&contacts);
    }

    /// Pairs every moved proxy with the proxies it overlaps, creating the missing contacts
    pub(super) fn find_new_contacts(&mut self) -> u32 {
        sprig_core::profile_function!();

        let pending = std::mem::take(&mut self.proxies_for_pairing);
        let mut keys = Vec::new();

        for &proxy in &pending {
            let (Some(aabb), Some(leaf)) = (self.tree.aabb(proxy), self.tree.leaf_data(proxy))
            else {
                continue;
            };

            self.tree.query(&aabb, |other| {
                if other != proxy
                    && self
                        .tree
                        .leaf_data(other)
                        .is_some_and(|v| v.body != leaf.body)
                {
                    keys.push(ContactKey::new(proxy, other));
                }

                ControlFlow::Continue(())
            });
        }

        self.proxies_for_pairing = pending;
        self.proxies_for_pairing.clear();

        keys.into_iter()
            .sorted_unstable()
            .dedup()
            .filter(|&key| self.add_contact(key))
            .count() as u32
    }

    fn add_contact(&mut self, key: ContactKey) -> bool {
        let (Some(leaf_a), Some(leaf_b)) = (
            self.tree.leaf_data(key.proxy_a()),
            self.tree.leaf_data(key.proxy_b()),
        ) else {
            return false;
        };

        if self.bodies[leaf_a.body]
            .contacts
            .iter()
            .any(|&(k, _)| k == key)
        {
            return false;
        }

        if !self.should_collide(leaf_a.fixture, leaf_b.fixture) {
            return false;
        }

        if self.contacts.used() >= self.conf.max_contacts {
            tracing::warn!(
                max = self.conf.max_contacts,
                "contact capacity reached, ignoring new pair"
            );
            return false;
        }

        let fixture_a = &self.fixtures[leaf_a.fixture];
        let fixture_b = &self.fixtures[leaf_b.fixture];
        let is_sensor = fixture_a.is_sensor || fixture_b.is_sensor;

        let contact = Contact::new(
            leaf_a.body,
            leaf_a.fixture,
            leaf_a.child,
            leaf_b.body,
            leaf_b.fixture,
            leaf_b.child,
            mix_friction(fixture_a.friction, fixture_b.friction),
            mix_restitution(fixture_a.restitution, fixture_b.restitution),
            is_sensor,
        );

        let id = self.contacts.allocate(contact);
        let manifold = self.manifolds.allocate(Manifold::default());
        debug_assert_eq!(id, manifold);

        self.bodies[leaf_a.body].contacts.push((key, id));
        self.bodies[leaf_b.body].contacts.push((key, id));
        self.contact_list.push((key, id));

        if !is_sensor {
            self.bodies[leaf_a.body].set_awake_flag();
            self.bodies[leaf_b.body].set_awake_flag();
        }

        true
    }

    /// Returns true if the two fixtures may form a contact.
    ///
    /// At least one body has to respond to impulses, a joint between the bodies may forbid the
    /// collision, and the fixture filters have to accept each other.
    pub(super) fn should_collide(&self, fixture_a: FixtureId, fixture_b: FixtureId) -> bool {
        let fixture_a = &self.fixtures[fixture_a];
        let fixture_b = &self.fixtures[fixture_b];
        let body_a = &self.bodies[fixture_a.body];
        let body_b = &self.bodies[fixture_b.body];

        if !(body_a.is_accelerable() || body_b.is_accelerable()) {
            return false;
        }

        let jointed = body_b.joints.iter().any(|&(joint, other)| {
            other == Some(fixture_a.body) && !self.joints[joint].collide_connected()
        });

        if jointed {
            return false;
        }

        fixture_a.filter.should_collide(&fixture_b.filter)
    }

    /// Updates the manifolds of stale contacts between bodies of which at least one is awake
    pub(super) fn update_contacts(&mut self, conf: &StepConf) -> ContactUpdates {
        sprig_core::profile_function!();

        let mut stats = ContactUpdates::default();
        let ids: Vec<_> = self.contact_list.iter().map(|v| v.1).collect();

        for id in ids {
            let contact = &self.contacts[id];
            let awake = self.bodies[contact.body_a].is_awake() || self.bodies[contact.body_b].is_awake();

            if !awake {
                stats.ignored += 1;
            } else if !contact.needs_updating() {
                stats.skipped += 1;
            } else {
                self.update_contact(id, conf);
                stats.updated += 1;
            }
        }

        stats
    }

    /// Recomputes the manifold of a contact at the current body transforms.
    ///
    /// Impulses of the previous manifold are carried over to the new points, and the contact
    /// listener is notified of touching changes.
    pub(super) fn update_contact(&mut self, id: ContactId, conf: &StepConf) {
        let old_manifold = self.manifolds[id].clone();

        let contact = &mut self.contacts[id];
        let fixture_a = &self.fixtures[contact.fixture_a];
        let fixture_b = &self.fixtures[contact.fixture_b];
        let xf_a = self.bodies[contact.body_a].xf;
        let xf_b = self.bodies[contact.body_b].xf;

        let proxy_a = fixture_a.shape.child(contact.child_a);
        let proxy_b = fixture_b.shape.child(contact.child_b);

        let is_sensor = fixture_a.is_sensor || fixture_b.is_sensor;
        let was_touching = contact.is_touching();

        contact.flags -= ContactFlags::NEEDS_UPDATING;
        contact.flags |= ContactFlags::ENABLED;
        contact.flags.set(ContactFlags::SENSOR, is_sensor);

        let (touching, manifold) = if is_sensor {
            let overlap = test_overlap(&proxy_a, &xf_a, &proxy_b, &xf_b);
            (overlap >= 0.0, Manifold::default())
        } else {
            let mut manifold = collide_shapes(
                &proxy_a,
                &xf_a,
                &proxy_b,
                &xf_b,
                &ManifoldConf {
                    linear_slop: conf.linear_slop,
                },
            );

            carry_impulses(&old_manifold, &mut manifold);
            (manifold.point_count() > 0, manifold)
        };

        contact.flags.set(ContactFlags::TOUCHING, touching);
        self.manifolds[id] = manifold;

        let Some(listener) = self.contact_listener.as_deref_mut() else {
            return;
        };

        match (was_touching, touching) {
            (false, true) => listener.begin_contact(id, contact),
            (true, false) => listener.end_contact(id, contact),
            _ => {}
        }

        if touching && !is_sensor {
            listener.pre_solve(id, contact, &self.manifolds[id], &old_manifold);
        }
    }
}

/// Seeds the impulses of new manifold points from the old point with the same feature, or else
/// from the nearest old point
fn carry_impulses(old: &Manifold, new: &mut Manifold) {
    if old.is_empty() {
        return;
    }

    for point in &mut new.points {
        let source = old
            .points
            .iter()
            .find(|v| v.feature == point.feature)
            .or_else(|| {
                old.points.iter().min_by(|a, b| {
                    let da = a.local_point.distance_squared(point.local_point);
                    let db = b.local_point.distance_squared(point.local_point);
                    da.total_cmp(&db)
                })
            });

        if let Some(source) = source {
            point.normal_impulse = source.normal_impulse;
            point.tangent_impulse = source.tangent_impulse;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use arrayvec::ArrayVec;
    use glam::vec2;
    use sprig_collision::{ContactFeature, Disk, FeatureKind, ManifoldPoint, Polygon};

    use crate::{BodyConf, ContactListener, FixtureConf, WorldConf};

    use super::*;

    fn point(x: f32, feature: ContactFeature, impulse: f32) -> ManifoldPoint {
        ManifoldPoint {
            local_point: vec2(x, 0.0),
            feature,
            separation: 0.0,
            normal_impulse: impulse,
            tangent_impulse: impulse * 0.5,
        }
    }

    #[test]
    fn impulses_follow_features() {
        crate::init_logging();
        let left = ContactFeature::new(FeatureKind::Vertex, 0, FeatureKind::Face, 1);
        let right = ContactFeature::new(FeatureKind::Vertex, 1, FeatureKind::Face, 1);
        let other = ContactFeature::new(FeatureKind::Vertex, 3, FeatureKind::Face, 2);

        let old = Manifold {
            points: ArrayVec::from([point(-1.0, left, 2.0), point(1.0, right, 4.0)]),
            ..Default::default()
        };

        // Matched by feature regardless of position, the unmatched one by distance
        let mut new = Manifold {
            points: ArrayVec::from([point(0.9, left, 0.0), point(-0.8, other, 0.0)]),
            ..Default::default()
        };

        carry_impulses(&old, &mut new);
        assert_eq!(new.points[0].normal_impulse, 2.0);
        assert_eq!(new.points[1].normal_impulse, 2.0);
        assert_eq!(new.points[1].tangent_impulse, 1.0);
    }

    #[derive(Default)]
    struct Events {
        begun: u32,
        ended: u32,
        ended_touching: Vec<(ContactId, FixtureId, FixtureId)>,
    }

    struct Recorder(Arc<Mutex<Events>>);

    impl ContactListener for Recorder {
        fn begin_contact(&mut self, _: ContactId, _: &Contact) {
            self.0.lock().unwrap().begun += 1;
        }

        fn end_contact(&mut self, id: ContactId, contact: &Contact) {
            let mut events = self.0.lock().unwrap();
            events.ended += 1;
            if contact.is_touching() {
                events
                    .ended_touching
                    .push((id, contact.fixture_a(), contact.fixture_b()));
            }
        }
    }

    #[test]
    fn new_pairs_link_both_bodies() {
        crate::init_logging();
        let mut world = World::default();
        let conf = FixtureConf::new().with_density(1.0);

        let a = world.create_body(&BodyConf::dynamic()).unwrap();
        let fixture_a = world.create_fixture(a, Disk::new(0.5), &conf, true).unwrap();
        let b = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.8, 0.0)))
            .unwrap();
        let fixture_b = world.create_fixture(b, Disk::new(0.5), &conf, true).unwrap();

        let stats = world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(stats.pre.contacts_added, 1);

        let (id, contact) = world.contacts().next().unwrap();
        let mut fixtures = [contact.fixture_a(), contact.fixture_b()];
        fixtures.sort();
        assert_eq!(fixtures, [fixture_a, fixture_b]);

        let body_a = world.body(a).unwrap().contacts();
        let body_b = world.body(b).unwrap().contacts();
        assert_eq!(body_a.len(), 1);
        assert_eq!(body_a, body_b);
        assert_eq!(body_a[0].1, id);
    }

    #[test]
    fn ending_contacts_are_reported_before_release() {
        crate::init_logging();
        let mut world = World::default();
        let events = Arc::new(Mutex::new(Events::default()));
        world.set_contact_listener(Recorder(events.clone()));

        let ground = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(ground, Polygon::new_box(4.0, 0.5), &FixtureConf::new(), false)
            .unwrap();

        let plank = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.0, 0.95)))
            .unwrap();
        let conf = FixtureConf::new().with_density(1.0);
        let left = world
            .create_fixture(plank, Polygon::new_oriented_box(0.5, 0.5, vec2(-1.5, 0.0), 0.0), &conf, true)
            .unwrap();
        let right = world
            .create_fixture(plank, Polygon::new_oriented_box(0.5, 0.5, vec2(1.5, 0.0), 0.0), &conf, true)
            .unwrap();

        world.step(&StepConf::new(1.0 / 60.0)).unwrap();
        assert_eq!(world.contact_count(), 2);
        let touching: Vec<_> = world.contacts().map(|(id, _)| id).collect();

        world.destroy_body(plank).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.ended_touching.len(), 2);
        for (id, fixture_a, fixture_b) in &events.ended_touching {
            assert!(touching.contains(id));
            assert!([left, right].iter().any(|v| v == fixture_a || v == fixture_b));
        }

        assert_eq!(world.contact_count(), 0);
        assert!(world.body(ground).unwrap().contacts().is_empty());
    }

    #[test]
    fn touching_changes_are_reported() {
        crate::init_logging();
        let mut world = World::default();
        let events = Arc::new(Mutex::new(Events::default()));
        world.set_contact_listener(Recorder(events.clone()));

        let ground = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(ground, Polygon::new_box(2.0, 0.5), &FixtureConf::new(), false)
            .unwrap();

        let block = world
            .create_body(&BodyConf::dynamic().with_location(vec2(0.0, 0.95)))
            .unwrap();
        world
            .create_fixture(block, Polygon::new_box(0.5, 0.5), &FixtureConf::new().with_density(1.0), true)
            .unwrap();

        world.step(&StepConf::new(1.0 / 60.0)).unwrap();
        assert_eq!(events.lock().unwrap().begun, 1);

        world.destroy_body(block).unwrap();
        assert_eq!(events.lock().unwrap().ended, 1);
        assert_eq!(world.contact_count(), 0);
    }

    #[test]
    fn contact_capacity_is_enforced() {
        crate::init_logging();
        let mut world = World::new(WorldConf::default().with_max_contacts(1)).unwrap();

        let ground = world.create_body(&BodyConf::default()).unwrap();
        world
            .create_fixture(ground, Polygon::new_box(4.0, 0.5), &FixtureConf::new(), false)
            .unwrap();

        for x in [-1.0, 1.0] {
            let body = world
                .create_body(&BodyConf::dynamic().with_location(vec2(x, 0.9)))
                .unwrap();
            world
                .create_fixture(body, Polygon::new_box(0.5, 0.5), &FixtureConf::new().with_density(1.0), true)
                .unwrap();
        }

        let stats = world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(stats.pre.contacts_added, 1);
        assert_eq!(world.contact_count(), 1);
    }

    #[test]
    fn static_pairs_are_ignored() {
        crate::init_logging();
        let mut world = World::default();
        for x in [0.0, 0.5] {
            let body = world
                .create_body(&BodyConf::default().with_location(vec2(x, 0.0)))
                .unwrap();
            world
                .create_fixture(body, Polygon::new_box(0.5, 0.5), &FixtureConf::new(), false)
                .unwrap();
        }

        world.step(&StepConf::new(0.0)).unwrap();
        assert_eq!(world.contact_count(), 0);
    }
}
