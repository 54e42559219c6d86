//! Dataset adapters.

mod subject_folder;

pub use subject_folder::SubjectFolderDataset;
