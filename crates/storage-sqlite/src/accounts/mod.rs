mod repository;

pub use repository::AccountRepository;
