//! Client side of the sync service: HTTP access and the sync controller.

pub mod api;
pub mod controller;
pub mod driver;

pub use api::{ActivityApi, AddressResolver, ClientError, HexAddressResolver, HttpActivityApi};
pub use controller::{ControllerAction, ControllerEvent, ControllerState};
pub use driver::{ControllerHandle, SyncController};
