pub mod download_progress;
pub mod error;
pub mod model_store;
pub mod notify;
pub mod settings;

pub use error::{AppError, ModelError};
pub use model_store::{ModelIdentity, ModelManager};
pub use notify::{Notify, Reporter};
pub use settings::Settings;
