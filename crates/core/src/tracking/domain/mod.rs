pub mod identity_tracker;
pub mod tracked_face;
