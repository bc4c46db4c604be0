mod credentials;

pub use credentials::StoredCredential;
