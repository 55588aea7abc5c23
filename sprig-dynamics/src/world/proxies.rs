use sprig_core::{BodyId, FixtureId, Transform};

use super::{LeafData, World, WorldFlags};

impl World {
    /// Creates or destroys the proxies of every queued fixture to match the state of its body
    pub(super) fn create_and_destroy_proxies(&mut self, extension: f32) -> u32 {
        let queued = std::mem::take(&mut self.fixtures_for_proxies);
        let mut count = 0;

        for &fixture in &queued {
            let Some(f) = self.fixtures.get(fixture) else {
                continue;
            };

            let enabled = self.bodies[f.body].is_enabled();
            if enabled && f.proxies.is_empty() {
                count += self.create_proxies(fixture, extension);
            } else if !enabled {
                self.destroy_proxies(fixture);
            }
        }

        self.fixtures_for_proxies = queued;
        self.fixtures_for_proxies.clear();
        count
    }

    fn create_proxies(&mut self, fixture: FixtureId, extension: f32) -> u32 {
        let f = &self.fixtures[fixture];
        let body = f.body;
        let xf = self.bodies[body].xf;

        let proxies: Vec<_> = (0..f.shape.child_count())
            .map(|child| {
                let aabb = f.shape.compute_aabb(child, &xf).fattened(extension);
                self.tree.insert(
                    aabb,
                    LeafData {
                        body,
                        fixture,
                        child,
                    },
                )
            })
            .collect();

        self.proxies_for_pairing.extend_from_slice(&proxies);
        self.flags |= WorldFlags::NEW_FIXTURES;

        let count = proxies.len() as u32;
        self.fixtures[fixture].proxies = proxies;
        count
    }

    pub(super) fn destroy_proxies(&mut self, fixture: FixtureId) {
        let proxies = std::mem::take(&mut self.fixtures[fixture].proxies);
        for proxy in proxies {
            self.tree.remove(proxy);
            self.proxies_for_pairing.retain(|&v| v != proxy);
        }
    }

    /// Synchronizes the proxies of teleported bodies
    pub(super) fn synchronize_queued(&mut self, extension: f32) -> u32 {
        let queued = std::mem::take(&mut self.bodies_for_proxies);
        let mut count = 0;

        for &body in &queued {
            if let Some(b) = self.bodies.get(body) {
                let xf = b.xf;
                count += self.synchronize_body(body, xf, xf, 0.0, extension);
            }
        }

        self.bodies_for_proxies = queued;
        self.bodies_for_proxies.clear();
        count
    }

    /// Grows the proxies of `body` to enclose its swept bounds from `xf1` to `xf2`.
    ///
    /// Proxies still enclosing the swept bounds are left alone. Moved proxies are displaced by
    /// `multiplier` times the motion to anticipate the next step.
    pub(super) fn synchronize_body(
        &mut self,
        body: BodyId,
        xf1: Transform,
        xf2: Transform,
        multiplier: f32,
        extension: f32,
    ) -> u32 {
        let displacement = multiplier * (xf2.p - xf1.p);
        let mut count = 0;

        for &fixture in &self.bodies[body].fixtures {
            let f = &self.fixtures[fixture];

            for (child, &proxy) in f.proxies.iter().enumerate() {
                let swept = f
                    .shape
                    .compute_aabb(child, &xf1)
                    .merge(&f.shape.compute_aabb(child, &xf2));

                let enclosed = self
                    .tree
                    .aabb(proxy)
                    .is_some_and(|fat| fat.contains(&swept));

                if !enclosed {
                    self.tree
                        .update(proxy, swept.fattened(extension).displaced(displacement));
                    self.proxies_for_pairing.push(proxy);
                    count += 1;
                }
            }
        }

        if count > 0 {
            self.flags |= WorldFlags::NEW_FIXTURES;
        }

        count
    }
}
