use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

mod common;

use sprig::{
    base::{FixtureId, JointId},
    collision::Manifold,
    joint::RevoluteJointConf,
    vec2, BodyConf, BodyId, Contact, ContactId, ContactImpulses, ContactListener,
    DestructionListener, Disk, FixtureConf, Polygon, StepConf, World,
};

#[derive(Debug, Default)]
struct Log {
    begin: Vec<ContactId>,
    end: Vec<ContactId>,
    pre_solve: usize,
    post_solve: usize,
    max_impulse: f32,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Log>>);

impl Recorder {
    fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.0.lock().unwrap()
    }
}

impl ContactListener for Recorder {
    fn begin_contact(&mut self, id: ContactId, _: &Contact) {
        self.log().begin.push(id);
    }

    fn end_contact(&mut self, id: ContactId, _: &Contact) {
        self.log().end.push(id);
    }

    fn pre_solve(&mut self, _: ContactId, _: &mut Contact, _: &Manifold, _: &Manifold) {
        self.log().pre_solve += 1;
    }

    fn post_solve(&mut self, _: ContactId, _: &Contact, impulses: &ContactImpulses, _: Option<u32>) {
        let mut log = self.log();
        log.post_solve += 1;
        log.max_impulse = log.max_impulse.max(impulses.max_normal());
    }
}

fn ground(world: &mut World) -> BodyId {
    let ground = world.create_body(&BodyConf::default()).unwrap();
    world
        .create_fixture(ground, Polygon::new_box(10.0, 0.5), &FixtureConf::new(), false)
        .unwrap();
    ground
}

fn ball(world: &mut World, y: f32, conf: &FixtureConf) -> BodyId {
    let body = world
        .create_body(
            &BodyConf::dynamic()
                .with_location(vec2(0.0, y))
                .with_linear_acceleration(vec2(0.0, -10.0)),
        )
        .unwrap();
    world.create_fixture(body, Disk::new(0.5), conf, true).unwrap();
    body
}

#[test]
fn landing_and_leaving_are_reported() {
    common::init_logging();
    let recorder = Recorder::default();
    let mut world = World::default();
    world.set_contact_listener(recorder.clone());

    ground(&mut world);
    let body = ball(&mut world, 3.0, &FixtureConf::new().with_density(1.0));

    let conf = StepConf::new(1.0 / 60.0);
    for _ in 0..120 {
        world.step(&conf).unwrap();
    }

    {
        let log = recorder.log();
        assert_eq!(log.begin.len(), 1);
        assert!(log.end.is_empty());
        assert!(log.pre_solve > 0);
        assert!(log.post_solve > 0);
        assert!(log.max_impulse > 0.0);
    }

    world.set_transform(body, vec2(0.0, 20.0), 0.0).unwrap();
    world.step(&conf).unwrap();

    let log = recorder.log();
    assert_eq!(log.end, log.begin);
    assert_eq!(world.contact_count(), 0);
}

#[test]
fn overlapping_again_begins_a_new_contact() {
    common::init_logging();
    let recorder = Recorder::default();
    let mut world = World::default();
    world.set_contact_listener(recorder.clone());

    let conf = FixtureConf::new().with_density(1.0);
    let a = world.create_body(&BodyConf::dynamic()).unwrap();
    world.create_fixture(a, Disk::new(0.5), &conf, true).unwrap();
    let b = world
        .create_body(&BodyConf::dynamic().with_location(vec2(5.0, 0.0)))
        .unwrap();
    world.create_fixture(b, Disk::new(0.5), &conf, true).unwrap();

    let step = StepConf::new(1.0 / 60.0);
    let mut place = |x: f32| {
        world.set_transform(a, vec2(0.0, 0.0), 0.0).unwrap();
        world.set_transform(b, vec2(x, 0.0), 0.0).unwrap();
        world.step(&step).unwrap();
    };

    place(5.0);
    assert!(recorder.log().begin.is_empty());

    place(0.8);
    place(5.0);
    place(0.8);

    let log = recorder.log();
    assert_eq!(log.begin.len(), 2);
    assert_eq!(log.end.len(), 1);
    assert_eq!(log.end[0], log.begin[0]);
}

#[test]
fn sensors_report_overlap_without_response() {
    common::init_logging();
    let recorder = Recorder::default();
    let mut world = World::default();
    world.set_contact_listener(recorder.clone());

    let region = world.create_body(&BodyConf::default().with_location(vec2(0.0, 3.0))).unwrap();
    world
        .create_fixture(
            region,
            Polygon::new_box(2.0, 1.0),
            &FixtureConf::new().with_sensor(true),
            false,
        )
        .unwrap();

    let body = ball(&mut world, 6.0, &FixtureConf::new().with_density(1.0));

    let conf = StepConf::new(1.0 / 60.0);
    for _ in 0..60 {
        world.step(&conf).unwrap();
    }

    let velocity = world.body(body).unwrap().linear_velocity();
    assert!((velocity.y + 10.0).abs() < 1e-3, "{velocity}");

    let log = recorder.log();
    assert_eq!(log.begin.len(), 1);
    assert_eq!(log.end, log.begin);
    assert_eq!(log.pre_solve, 0);
    assert_eq!(log.post_solve, 0);
}

/// Lets everything pass through fixtures marked as ghosts
struct Ghosts(FixtureId);

impl ContactListener for Ghosts {
    fn pre_solve(&mut self, _: ContactId, contact: &mut Contact, _: &Manifold, _: &Manifold) {
        if contact.fixture_a() == self.0 || contact.fixture_b() == self.0 {
            contact.set_enabled(false);
        }
    }
}

#[test]
fn disabled_contacts_are_not_solved() {
    common::init_logging();
    let mut world = World::default();
    let ground = ground(&mut world);
    let floor = world.body(ground).unwrap().fixtures()[0];
    world.set_contact_listener(Ghosts(floor));

    let body = ball(&mut world, 2.0, &FixtureConf::new().with_density(1.0));

    let conf = StepConf::new(1.0 / 60.0);
    for _ in 0..60 {
        world.step(&conf).unwrap();
    }

    assert!(world.body(body).unwrap().location().y < 0.0);
}

#[derive(Debug, Default)]
struct Destroyed {
    bodies: Vec<BodyId>,
    fixtures: Vec<FixtureId>,
    joints: Vec<JointId>,
}

#[derive(Clone, Default)]
struct DestructionRecorder(Arc<Mutex<Destroyed>>);

impl DestructionListener for DestructionRecorder {
    fn body(&mut self, id: BodyId) {
        self.0.lock().unwrap().bodies.push(id);
    }

    fn fixture(&mut self, id: FixtureId) {
        self.0.lock().unwrap().fixtures.push(id);
    }

    fn joint(&mut self, id: JointId) {
        self.0.lock().unwrap().joints.push(id);
    }
}

#[test]
fn implicit_destruction_is_reported() {
    common::init_logging();
    let recorder = DestructionRecorder::default();
    let mut world = World::default();
    world.set_destruction_listener(recorder.clone());

    let ground = ground(&mut world);
    let body = world.create_body(&BodyConf::dynamic().with_location(vec2(0.0, 2.0))).unwrap();
    let a = world
        .create_fixture(body, Disk::new(0.5), &FixtureConf::new().with_density(1.0), true)
        .unwrap();
    let b = world
        .create_fixture(body, Polygon::new_box(0.2, 0.2), &FixtureConf::new().with_density(1.0), true)
        .unwrap();
    let joint = world
        .create_joint(RevoluteJointConf::new(ground, body).with_local_anchors(vec2(0.0, 2.0), vec2(0.0, 0.0)))
        .unwrap();

    // Explicitly destroyed entities are not reported
    let other = world.create_body(&BodyConf::dynamic()).unwrap();
    let fixture = world
        .create_fixture(other, Disk::new(0.5), &FixtureConf::new(), false)
        .unwrap();
    world.destroy_fixture(fixture, false).unwrap();

    world.destroy_body(body).unwrap();

    {
        let destroyed = recorder.0.lock().unwrap();
        assert_eq!(destroyed.fixtures, [a, b]);
        assert_eq!(destroyed.joints, [joint]);
        assert!(destroyed.bodies.is_empty());
    }

    world.clear().unwrap();

    let destroyed = recorder.0.lock().unwrap();
    assert_eq!(destroyed.bodies, [ground, other]);
    assert_eq!(destroyed.fixtures.len(), 3);
    assert_eq!(world.body_count(), 0);
}

struct Panicking;

impl ContactListener for Panicking {
    fn begin_contact(&mut self, _: ContactId, _: &Contact) {
        panic!("listener failed");
    }
}

#[test]
fn panicking_listener_releases_the_lock() {
    common::init_logging();
    let mut world = World::default();
    world.set_contact_listener(Panicking);

    ground(&mut world);
    ball(&mut world, 0.9, &FixtureConf::new().with_density(1.0));

    let result = catch_unwind(AssertUnwindSafe(|| world.step(&StepConf::new(1.0 / 60.0))));
    assert!(result.is_err());

    assert!(!world.is_locked());
    assert!(world.create_body(&BodyConf::default()).is_ok());

    world.take_contact_listener();
    assert!(world.step(&StepConf::new(1.0 / 60.0)).is_ok());
    assert_eq!(world.clear(), Ok(()));
    assert_eq!(world.body_count(), 0);
}
