use sav_core::ai::AiError;
use sav_core::api::{SavRequest, SavResponse};
use sav_core::messaging::{self, Outgoing};
use sav_core::models::Expert;
use sav_core::remote::{Filter, Table};
use sav_core::templates::Tier;
use sav_core::tracker::ActionDetails;
use sav_core::AccessGate;
use serde_json::json;

use crate::state::AppState;

/// Default number of expert matches returned.
pub const DEFAULT_MATCH_LIMIT: usize = 5;

pub async fn handle_request(request: SavRequest, state: &AppState) -> SavResponse {
    match request {
        SavRequest::Health => match state.remote.health().await {
            Ok(version) => SavResponse::ok(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "backend": state.remote.name(),
                "backend_version": version,
                "dev_mode": state.flags.dev_mode(),
                "ai": state.ai.is_some(),
                "telegram": state.telegram.is_some(),
            })),
            Err(e) => SavResponse::err_with_code(format!("Remote store health check failed: {}", e), 503),
        },
        SavRequest::Access { telegram_id } => {
            let mut gate = AccessGate::new(&state.flags);
            let access = gate
                .authenticated(telegram_id.as_deref(), state.remote.as_ref())
                .await;
            SavResponse::ok(json!({
                "access": access,
                "level": access.level(),
                "can_view": access.can_view(),
                "can_edit": access.can_edit(),
                "is_admin": access.is_admin(),
            }))
        }
        SavRequest::TrackAction {
            telegram_user_id,
            kind,
            name,
            page,
            field,
            value,
            extra,
        } => {
            let tracker = state.tracker(telegram_user_id.as_deref(), kind).await;
            let details = ActionDetails {
                page,
                field,
                value,
                extra,
            };
            tracker.track_action(&name, details).await;
            SavResponse::ok(json!({
                "tracked": tracker.owner().is_some(),
                "session_id": tracker.session_id().await,
                "actions": tracker.actions().len(),
            }))
        }
        SavRequest::SaveSession {
            telegram_user_id,
            kind,
            form_data,
        } => {
            let tracker = state.tracker(telegram_user_id.as_deref(), kind).await;
            tracker.save_session_data(form_data).await;
            SavResponse::ok(json!({
                "saved": tracker.owner().is_some(),
                "session_id": tracker.session_id().await,
            }))
        }
        SavRequest::ResetSession {
            telegram_user_id,
            kind,
        } => {
            state.reset_tracker(telegram_user_id.as_deref(), kind).await;
            SavResponse::ok(json!({"reset": true}))
        }
        SavRequest::GetTemplate { template_type } => {
            let load = state.template(&template_type).await;
            SavResponse::ok(json!({
                "template_type": template_type,
                "source": load.source,
                "settings": load.settings,
            }))
        }
        SavRequest::SaveTemplate {
            template_type,
            settings,
        } => {
            let store = state.template_store(&template_type).await;
            let outcome = store.save_template(settings).await;
            if outcome.source == Tier::None {
                return SavResponse::err(outcome.message);
            }
            SavResponse::ok(json!(outcome))
        }
        SavRequest::SendTemplate {
            template_type,
            chat_id,
            client_id,
            data,
        } => {
            let Some(telegram) = state.telegram.as_ref() else {
                return SavResponse::err_with_code("Telegram delivery is not configured", 503);
            };
            let load = state.template(&template_type).await;
            let Some(settings) = load.settings else {
                return SavResponse::err_with_code(format!("No template for type {}", template_type), 404);
            };
            let outgoing = Outgoing::from_template(&settings, &data);
            match messaging::deliver(state.remote.as_ref(), telegram, client_id.as_deref(), &chat_id, &outgoing).await {
                Ok(report) => SavResponse::ok(json!(report)),
                Err(e) => SavResponse::err(e.to_string()),
            }
        }
        SavRequest::ClassifySeller { description } => {
            let Some(ai) = state.ai.as_ref() else {
                return ai_unavailable();
            };
            match ai.classify_seller(&description).await {
                Ok(c) => SavResponse::ok(json!(c)),
                Err(e) => ai_error(e),
            }
        }
        SavRequest::MatchExperts { query, city, limit } => {
            let Some(ai) = state.ai.as_ref() else {
                return ai_unavailable();
            };
            let filters: Vec<Filter> = city
                .iter()
                .filter(|c| !c.trim().is_empty())
                .map(|c| Filter::eq("city", c))
                .collect();
            let experts: Vec<Expert> = match state.remote.select(Table::Experts, &filters, None).await {
                Ok(rows) => rows.iter().filter_map(Expert::from_row).collect(),
                Err(e) => return SavResponse::err(format!("Failed to load experts: {}", e)),
            };

            let limit = limit.unwrap_or(DEFAULT_MATCH_LIMIT);
            match ai.match_experts(&query, &experts, limit).await {
                Ok(matches) => SavResponse::ok(json!({
                    "matches": matches,
                    "candidates": experts.len(),
                })),
                Err(e) => ai_error(e),
            }
        }
        SavRequest::RecommendTariff {
            description,
            answers,
        } => {
            let Some(ai) = state.ai.as_ref() else {
                return ai_unavailable();
            };
            match ai
                .recommend_tariff(&description, &answers, &state.config.ai.tariffs)
                .await
            {
                Ok(r) => SavResponse::ok(json!(r)),
                Err(e) => ai_error(e),
            }
        }
        SavRequest::SendMessage {
            chat_id,
            text,
            client_id,
        } => {
            let Some(telegram) = state.telegram.as_ref() else {
                return SavResponse::err_with_code("Telegram delivery is not configured", 503);
            };
            let outgoing = Outgoing::Text(text);
            match messaging::deliver(state.remote.as_ref(), telegram, client_id.as_deref(), &chat_id, &outgoing).await {
                Ok(report) => SavResponse::ok(json!(report)),
                Err(e) => SavResponse::err(e.to_string()),
            }
        }
        SavRequest::UpsertProfile { profile } => {
            match messaging::upsert_profile(state.remote.as_ref(), &profile).await {
                Ok(id) => SavResponse::ok(json!({
                    "id": id,
                    "telegram_id": profile.telegram_id,
                })),
                Err(e) => SavResponse::err(e.to_string()),
            }
        }
    }
}

fn ai_unavailable() -> SavResponse {
    SavResponse::err_with_code("AI gateway is not configured", 503)
}

fn ai_error(e: AiError) -> SavResponse {
    tracing::error!(error = %e, "AI gateway request failed");
    SavResponse::err_with_code(e.user_message(), e.status_code())
}
