pub mod gemini;
pub mod limiter;
pub mod media;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::component::{Directive, GenerationKnobs, ImageBlob};

/// The upstream multimodal model, reduced to the two call modes the pipeline
/// needs. Implemented by the Gemini client; mocked in tests.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Image in, text out. The text is expected to be JSON matching the
    /// analyzer's requested shape, but callers must not assume it is.
    async fn analyze(
        &self,
        image: &ImageBlob,
        prompt: &str,
        knobs: &GenerationKnobs,
    ) -> Result<String>;

    /// Images plus prose in, one image out.
    async fn generate(&self, directive: &Directive) -> Result<ImageBlob>;
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::Oracle;
    use crate::error::Result;
    use crate::pipeline::component::{Directive, GenerationKnobs, ImageBlob};

    /// Scripted oracle: queued responses are served in order, then defaults.
    pub struct MockOracle {
        analyze_queue: Mutex<VecDeque<Result<String>>>,
        generate_queue: Mutex<VecDeque<Result<ImageBlob>>>,
        pub analyze_calls: AtomicUsize,
        pub generate_calls: AtomicUsize,
        pub last_prose: Mutex<String>,
        default_analysis: String,
    }

    impl MockOracle {
        pub fn new() -> Self {
            MockOracle {
                analyze_queue: Mutex::new(VecDeque::new()),
                generate_queue: Mutex::new(VecDeque::new()),
                analyze_calls: AtomicUsize::new(0),
                generate_calls: AtomicUsize::new(0),
                last_prose: Mutex::new(String::new()),
                default_analysis: r#"{"overall": "plain analysis"}"#.to_string(),
            }
        }

        pub fn with_default_analysis(mut self, json: &str) -> Self {
            self.default_analysis = json.to_string();
            self
        }

        pub fn queue_analysis(&self, response: Result<String>) {
            self.analyze_queue.lock().unwrap().push_back(response);
        }

        pub fn queue_generation(&self, response: Result<ImageBlob>) {
            self.generate_queue.lock().unwrap().push_back(response);
        }

        pub fn png_blob() -> ImageBlob {
            ImageBlob {
                bytes: b"generated-png-bytes".to_vec(),
                mime: "image/png".to_string(),
            }
        }
    }

    #[async_trait]
    impl Oracle for MockOracle {
        async fn analyze(
            &self,
            _image: &ImageBlob,
            _prompt: &str,
            _knobs: &GenerationKnobs,
        ) -> Result<String> {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            match self.analyze_queue.lock().unwrap().pop_front() {
                Some(response) => response,
                None => Ok(self.default_analysis.clone()),
            }
        }

        async fn generate(&self, directive: &Directive) -> Result<ImageBlob> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prose.lock().unwrap() = directive.prose.clone();
            match self.generate_queue.lock().unwrap().pop_front() {
                Some(response) => response,
                None => Ok(Self::png_blob()),
            }
        }
    }
}
