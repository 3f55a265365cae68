pub mod sample_loader;

pub use sample_loader::{SampleSource, index_wav_in_dir, load};
