use sprig_collision::Manifold;
use sprig_core::{BodyId, ContactId, FixtureId, JointId};

use crate::{Contact, ContactImpulses};

/// Receives contact events while the world steps.
///
/// Listeners are called synchronously from within [`World::step`](crate::World::step) and never
/// have access to the world, so they cannot mutate it mid-step.
#[allow(unused_variables)]
pub trait ContactListener {
    /// The two fixtures started overlapping
    fn begin_contact(&mut self, id: ContactId, contact: &Contact) {}

    /// The two fixtures stopped overlapping, or the contact is being destroyed while touching
    fn end_contact(&mut self, id: ContactId, contact: &Contact) {}

    /// Called for touching non-sensor contacts after their manifold was updated.
    ///
    /// `old_manifold` is the manifold before the update. The contact may be disabled for the
    /// remainder of the step.
    fn pre_solve(
        &mut self,
        id: ContactId,
        contact: &mut Contact,
        manifold: &Manifold,
        old_manifold: &Manifold,
    ) {
    }

    /// Reports the impulses applied to a contact.
    ///
    /// `solved_iterations` is the number of position iterations needed to resolve the island, or
    /// `None` if the island did not converge.
    fn post_solve(
        &mut self,
        id: ContactId,
        contact: &Contact,
        impulses: &ContactImpulses,
        solved_iterations: Option<u32>,
    ) {
    }
}

/// Notified when entities are destroyed implicitly, i.e. as a consequence of destroying the
/// entity that owns them
#[allow(unused_variables)]
pub trait DestructionListener {
    fn body(&mut self, id: BodyId) {}
    fn fixture(&mut self, id: FixtureId) {}
    fn joint(&mut self, id: JointId) {}
}
