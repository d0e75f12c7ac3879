pub mod types;
pub mod translate;
pub mod stream;

pub use stream::{translate_stream, TransportError};
pub use translate::{DeltaTranslator, TranslateOutput};
pub use types::{AgUiEvent, Message, RunAgentInput, Tool};
