pub mod campaign;
pub mod delivery_event;
pub mod recipient;
