use std::sync::Arc;

use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    providers::{FetchStep, PayloadLocator, PayloadSource, ProviderProfile, StepTarget},
    server::{
        error::{ExtractionFailed, FetchCause, FetchError, Stage},
        services::relay_services::{DynRelayService, FetchOptions},
        utils::{
            decoders::{self, EncodedPayload, parse_packed_call},
            url_validator,
        },
    },
};

/// where one mirror attempt is, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Init,
    FetchEmbed,
    FetchRedirect,
    FetchPlayer,
    ExtractPayload,
    Decode,
    Validate,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub provider_id: String,
    pub content_ref: String,
    pub locale: Option<String>,
    /// mirror to start from, later mirrors follow in table order
    pub mirror: Option<usize>,
}

impl ExtractionRequest {
    pub fn new(provider_id: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            content_ref: content_ref.into(),
            locale: None,
            mirror: None,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_mirror(mut self, mirror: usize) -> Self {
        self.mirror = Some(mirror);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub stream_url: Url,
    pub profile: Arc<ProviderProfile>,
    /// session token captured next to the payload, feeds the key authenticator
    pub token: Option<String>,
    pub mirror: String,
}

#[derive(Debug, Clone)]
struct Page {
    url: Url,
    body: String,
}

/// state plus whatever the previous transition produced for the next one
enum Step {
    Init,
    FetchEmbed,
    FetchRedirect { embed: Page },
    FetchPlayer { previous: Page },
    ExtractPayload { player: Page },
    Decode { payload: EncodedPayload },
    Validate { candidate: String, token: Option<String> },
    Done { stream_url: Url, token: Option<String> },
}

impl Step {
    fn state(&self) -> ExtractionState {
        match self {
            Step::Init => ExtractionState::Init,
            Step::FetchEmbed => ExtractionState::FetchEmbed,
            Step::FetchRedirect { .. } => ExtractionState::FetchRedirect,
            Step::FetchPlayer { .. } => ExtractionState::FetchPlayer,
            Step::ExtractPayload { .. } => ExtractionState::ExtractPayload,
            Step::Decode { .. } => ExtractionState::Decode,
            Step::Validate { .. } => ExtractionState::Validate,
            Step::Done { .. } => ExtractionState::Done,
        }
    }
}

/// fetch and extract failures move on to the next mirror, anything after that is final
#[derive(Debug, Error)]
enum MirrorFailure {
    #[error(transparent)]
    Retry(FetchError),

    #[error(transparent)]
    Fatal(ExtractionFailed),
}

impl MirrorFailure {
    fn retry(stage: Stage, cause: impl Into<FetchCause>) -> Self {
        MirrorFailure::Retry(FetchError::new(stage, cause))
    }
}

struct ChainContext<'a> {
    profile: &'a ProviderProfile,
    request: &'a ExtractionRequest,
    mirror: &'a str,
}

/// mirrors to try, starting at `start` and wrapping, at most `max_mirrors` of them
pub fn mirror_order(profile: &ProviderProfile, start: usize) -> Vec<&str> {
    let count = profile.mirrors.len();
    if count == 0 {
        return Vec::new();
    }

    let start = start % count;
    (0..count.min(profile.max_mirrors))
        .map(|i| profile.mirrors[(start + i) % count].as_str())
        .collect()
}

pub struct ProviderExtractor {
    relay: DynRelayService,
}

impl ProviderExtractor {
    pub fn new(relay: DynRelayService) -> Self {
        Self { relay }
    }

    pub async fn extract(
        &self,
        profile: Arc<ProviderProfile>,
        request: &ExtractionRequest,
    ) -> Result<Extraction, ExtractionFailed> {
        let order = mirror_order(&profile, request.mirror.unwrap_or(0));
        let mut last = None;

        for (tried, mirror) in order.iter().copied().enumerate() {
            let ctx = ChainContext {
                profile: &profile,
                request,
                mirror,
            };

            match self.run_chain(&ctx).await {
                Ok((stream_url, token)) => {
                    info!(
                        "{} resolved {} via {}",
                        profile.id, request.content_ref, mirror
                    );
                    return Ok(Extraction {
                        stream_url,
                        profile: profile.clone(),
                        token,
                        mirror: mirror.to_string(),
                    });
                }
                Err(MirrorFailure::Fatal(err)) => {
                    warn!("{} failed at {} on {}: {}", profile.id, err.stage(), mirror, err);
                    return Err(err);
                }
                Err(MirrorFailure::Retry(err)) => {
                    warn!(
                        "{} mirror {} ({}/{}) failed: {}",
                        profile.id,
                        mirror,
                        tried + 1,
                        order.len(),
                        err
                    );
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => Err(ExtractionFailed::MirrorsExhausted {
                tried: order.len(),
                last,
            }),
            None => Err(ExtractionFailed::NoMirrors),
        }
    }

    async fn run_chain(
        &self,
        ctx: &ChainContext<'_>,
    ) -> Result<(Url, Option<String>), MirrorFailure> {
        let mut step = Step::Init;

        loop {
            let from = step.state();
            let next = match self.advance(ctx, step).await {
                Ok(next) => next,
                Err(failure) => {
                    debug!(
                        "{}@{}: {:?} -> {:?} ({})",
                        ctx.profile.id,
                        ctx.mirror,
                        from,
                        ExtractionState::Failed,
                        failure
                    );
                    return Err(failure);
                }
            };
            debug!(
                "{}@{}: {:?} -> {:?}",
                ctx.profile.id,
                ctx.mirror,
                from,
                next.state()
            );

            if let Step::Done { stream_url, token } = next {
                return Ok((stream_url, token));
            }
            step = next;
        }
    }

    async fn advance(&self, ctx: &ChainContext<'_>, step: Step) -> Result<Step, MirrorFailure> {
        let chain = &ctx.profile.chain;

        let next = match step {
            Step::Init => Step::FetchEmbed,
            Step::FetchEmbed => Step::FetchRedirect {
                embed: self.fetch_page(ctx, Stage::Embed, &chain.embed, None).await?,
            },
            Step::FetchRedirect { embed } => match &chain.redirect {
                Some(redirect) => Step::FetchPlayer {
                    previous: self
                        .fetch_page(ctx, Stage::Redirect, redirect, Some(&embed))
                        .await?,
                },
                None => Step::FetchPlayer { previous: embed },
            },
            Step::FetchPlayer { previous } => Step::ExtractPayload {
                player: self
                    .fetch_page(ctx, Stage::Player, &chain.player, Some(&previous))
                    .await?,
            },
            Step::ExtractPayload { player } => Step::Decode {
                payload: extract_payload(&ctx.profile.payload, &player)?,
            },
            Step::Decode { payload } => {
                let candidate = decoders::decode(&ctx.profile.decode, &payload)
                    .map_err(|e| MirrorFailure::Fatal(e.into()))?;
                Step::Validate {
                    candidate,
                    token: payload.token,
                }
            }
            Step::Validate { candidate, token } => {
                let stream_url = url_validator::validate(&candidate, ctx.profile)
                    .into_result(&candidate)
                    .map_err(|e| {
                        warn!(
                            "{}@{} rejected candidate {}: {}",
                            ctx.profile.id,
                            ctx.mirror,
                            e.candidate(),
                            e
                        );
                        MirrorFailure::Fatal(e.into())
                    })?;
                Step::Done { stream_url, token }
            }
            done @ Step::Done { .. } => done,
        };

        Ok(next)
    }

    async fn fetch_page(
        &self,
        ctx: &ChainContext<'_>,
        stage: Stage,
        step: &FetchStep,
        previous: Option<&Page>,
    ) -> Result<Page, MirrorFailure> {
        let target =
            resolve_target(ctx, &step.target, previous).map_err(|c| MirrorFailure::retry(stage, c))?;

        let options = FetchOptions {
            method: step.method,
            referer: previous.map(|p| p.url.to_string()),
            origin: previous.map(|p| p.url.origin().ascii_serialization()),
            headers: Vec::new(),
        };

        let response = self
            .relay
            .fetch(target.as_str(), &options, ctx.profile)
            .await
            .map_err(|e| MirrorFailure::retry(stage, e))?;

        let url = Url::parse(&response.final_url).unwrap_or(target);
        let body = response
            .text()
            .map(str::to_string)
            .map_err(|e| MirrorFailure::retry(stage, FetchCause::UnparsableBody(e.to_string())))?;

        Ok(Page { url, body })
    }
}

fn render_template(template: &str, ctx: &ChainContext<'_>, previous: Option<&Page>) -> String {
    let locale = ctx.request.locale.as_deref().unwrap_or_default();
    template
        .replace("{mirror}", ctx.mirror)
        .replace("{content}", &urlencoding::encode(&ctx.request.content_ref))
        .replace("{locale}", &urlencoding::encode(locale))
        .replace("{previous}", previous.map(|p| p.url.as_str()).unwrap_or_default())
}

fn resolve_target(
    ctx: &ChainContext<'_>,
    target: &StepTarget,
    previous: Option<&Page>,
) -> Result<Url, FetchCause> {
    match target {
        StepTarget::Template { url } => {
            let rendered = render_template(url, ctx, previous);
            Url::parse(&rendered).map_err(|e| FetchCause::NoTarget(format!("'{}': {}", rendered, e)))
        }
        StepTarget::Follow { pattern } => {
            let previous = previous
                .ok_or_else(|| FetchCause::NoTarget("follow step without a previous page".into()))?;
            let found = pattern
                .regex()
                .captures(&previous.body)
                .and_then(|c| c.name("url"))
                .ok_or_else(|| {
                    FetchCause::NoTarget(format!("'{}' matched nothing", pattern.as_str()))
                })?;

            let link = found.as_str().trim().replace("&amp;", "&");
            previous
                .url
                .join(&link)
                .map_err(|e| FetchCause::NoTarget(format!("'{}': {}", link, e)))
        }
    }
}

/// sync on purpose, the parsed document must not live across an await
fn extract_payload(locator: &PayloadLocator, page: &Page) -> Result<EncodedPayload, MirrorFailure> {
    let missing = |detail: String| MirrorFailure::retry(Stage::ExtractPayload, FetchCause::PayloadMissing(detail));

    let document = Html::parse_document(&page.body);
    let selector = Selector::parse(locator.source.selector()).map_err(|e| {
        MirrorFailure::retry(
            Stage::ExtractPayload,
            FetchCause::UnparsableBody(format!("selector does not parse: {:?}", e)),
        )
    })?;
    let first = || {
        document
            .select(&selector)
            .next()
            .ok_or_else(|| missing(format!("no element matches '{}'", locator.source.selector())))
    };

    let mut payload = match &locator.source {
        PayloadSource::Element {
            attribute, params, ..
        } => {
            let element = first()?;
            let text = match attribute {
                Some(name) => element
                    .value()
                    .attr(name)
                    .map(str::to_string)
                    .ok_or_else(|| missing(format!("marker has no '{}' attribute", name)))?,
                None => element.text().collect::<String>(),
            };
            let text = text.trim();
            if text.is_empty() {
                return Err(missing("marker element is empty".into()));
            }

            params.iter().fold(EncodedPayload::new(text), |payload, (param, attr)| {
                match element.value().attr(attr) {
                    Some(value) => payload.with_param(param, value),
                    None => payload,
                }
            })
        }
        // the script was fetched fine, a shape we don't know is a decode problem
        PayloadSource::Packed { .. } => parse_packed_call(&first()?.text().collect::<String>())
            .map_err(|e| MirrorFailure::Fatal(e.into()))?,
        // pages carry several scripts, the first one holding the assignment wins
        PayloadSource::ScriptAssignment { pattern, .. } => document
            .select(&selector)
            .find_map(|script| {
                let text = script.text().collect::<String>();
                pattern
                    .regex()
                    .captures(&text)
                    .and_then(|c| c.name("payload"))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|p| !p.is_empty())
            })
            .map(EncodedPayload::new)
            .ok_or_else(|| {
                missing(format!("no script assigns a payload matching '{}'", pattern.as_str()))
            })?,
    };

    payload.token = locator
        .token_pattern
        .as_ref()
        .and_then(|p| p.regex().captures(&page.body))
        .and_then(|c| c.name("token"))
        .map(|m| m.as_str().to_string());

    Ok(payload)
}
