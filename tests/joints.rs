use sprig::{
    joint::{PrismaticJointConf, RevoluteJointConf, RopeJointConf, TargetJointConf},
    vec2, BodyConf, BodyId, Disk, FixtureConf, StepConf, Vec2, World,
};

mod common;

const ANCHOR: Vec2 = Vec2::new(0.0, 10.0);

fn bob(world: &mut World, location: Vec2, gravity: bool) -> anyhow::Result<BodyId> {
    let acceleration = if gravity { vec2(0.0, -10.0) } else { Vec2::ZERO };
    let body = world.create_body(
        &BodyConf::dynamic()
            .with_location(location)
            .with_linear_acceleration(acceleration),
    )?;
    world.create_fixture(body, Disk::new(0.25), &FixtureConf::new().with_density(1.0), true)?;
    Ok(body)
}

fn run(world: &mut World, steps: usize) -> anyhow::Result<()> {
    let conf = StepConf::new(1.0 / 60.0);
    for _ in 0..steps {
        world.step(&conf)?;
    }

    Ok(())
}

#[test]
fn pendulum_keeps_its_length() -> anyhow::Result<()> {
    common::init_logging();
    let mut world = World::default();
    let ground = world.create_body(&BodyConf::default())?;
    let bob = bob(&mut world, vec2(3.0, 10.0), true)?;
    world.create_joint(RevoluteJointConf::at(&world, ground, bob, ANCHOR)?)?;

    let conf = StepConf::new(1.0 / 60.0);
    let mut lowest = f32::MAX;
    for _ in 0..180 {
        world.step(&conf)?;

        let location = world.body(bob)?.location();
        lowest = lowest.min(location.y);
        assert!((location.distance(ANCHOR) - 3.0).abs() < 0.05, "{location}");
    }

    assert!(lowest < 7.5);
    Ok(())
}

#[test]
fn rope_limits_distance() -> anyhow::Result<()> {
    common::init_logging();
    let mut world = World::default();
    let ground = world.create_body(&BodyConf::default())?;
    let bob = bob(&mut world, vec2(2.0, 10.0), true)?;
    world.create_joint(RopeJointConf::at(&world, ground, bob, ANCHOR, vec2(2.0, 10.0))?)?;

    let conf = StepConf::new(1.0 / 60.0);
    for _ in 0..180 {
        world.step(&conf)?;

        let location = world.body(bob)?.location();
        assert!(location.distance(ANCHOR) < 2.05, "{location}");
    }

    Ok(())
}

#[test]
fn prismatic_slides_to_its_limit() -> anyhow::Result<()> {
    common::init_logging();
    let mut world = World::default();
    let ground = world.create_body(&BodyConf::default())?;
    let body = bob(&mut world, vec2(0.0, 5.0), true)?;
    world.create_joint(
        PrismaticJointConf::at(&world, ground, body, vec2(0.0, 5.0), Vec2::Y)?.with_limits(-2.0, 0.0),
    )?;

    run(&mut world, 120)?;

    let body = world.body(body)?;
    assert!((body.location().y - 3.0).abs() < 0.05, "{}", body.location());
    assert!(body.location().x.abs() < 1e-3);
    assert!(body.angle().abs() < 1e-3);
    Ok(())
}

#[test]
fn target_drags_body() -> anyhow::Result<()> {
    common::init_logging();
    let mut world = World::default();
    let body = bob(&mut world, Vec2::ZERO, false)?;
    let joint = world.create_joint(TargetJointConf::at(&world, body, Vec2::ZERO)?.with_max_force(100.0))?;

    run(&mut world, 120)?;
    assert!(!world.body(body)?.is_awake());

    // Moving the target wakes the body
    let target = world
        .joint_mut(joint)?
        .as_target_mut()
        .ok_or_else(|| anyhow::anyhow!("not a target joint"))?;
    target.set_target(vec2(2.0, 1.0));
    assert!(world.body(body)?.is_awake());

    run(&mut world, 120)?;
    let location = world.body(body)?.location();
    assert!(location.distance(vec2(2.0, 1.0)) < 0.1, "{location}");
    Ok(())
}
