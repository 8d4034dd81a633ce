use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

pub fn build_formatting_layer<S, W>(
    config: &LoggingConfiguration, writer: W, ansi: bool,
) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.log_format_json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        Layer::new()
            .compact()
            .with_ansi(ansi)
            .with_target(false)
            .with_writer(writer)
            .boxed()
    }
}
