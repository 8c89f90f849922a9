// Response models shared by storefront endpoints

mod envelope;

pub use envelope::ListEnvelope;
