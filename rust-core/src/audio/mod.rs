//! Recording input: WAV decoding, meter references and batch layout

pub mod wav;
pub mod reference;
pub mod batch;

pub use batch::{AudioBatch, EnvFolder, RpmFolder, SweepFolder};
pub use reference::read_reference;
pub use wav::{load_wav, Recording};
