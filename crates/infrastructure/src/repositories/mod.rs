pub mod device_directory;
pub mod in_memory_execution_repository;
pub mod sqlite_execution_repository;

pub use device_directory::StaticDeviceDirectory;
pub use in_memory_execution_repository::InMemoryExecutionRepository;
pub use sqlite_execution_repository::SqliteExecutionRepository;
