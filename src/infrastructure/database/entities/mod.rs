//! SeaORM entities

pub mod reservation;
pub mod spot;
pub mod subscriber;

pub use reservation::Entity as Reservation;
pub use spot::Entity as Spot;
pub use subscriber::Entity as Subscriber;
