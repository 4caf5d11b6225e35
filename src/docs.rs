use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::TaskAction;
use crate::models::{Task, TaskState};
use crate::routes::{engine, health, tasks};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		engine::authorize,
		engine::search_predicate,
		engine::auto_assignee,
		engine::classify_action,
		tasks::get_task,
		tasks::search_tasks,
		tasks::claim_task,
		tasks::unclaim_task,
		tasks::assign_task,
		tasks::auto_assign_task
	),
	components(
		schemas(
			Task,
			TaskState,
			TaskAction,
			health::HealthResponse,
			engine::AuthorizeRequest,
			engine::AuthorizeResponse,
			engine::SearchPredicateRequest,
			engine::SearchPredicateResponse,
			engine::AutoAssigneeRequest,
			engine::AutoAssigneeResponse,
			engine::ClassifyActionRequest,
			engine::ClassifyActionResponse,
			tasks::SearchRequest,
			tasks::SearchResponse,
			tasks::AssignRequest,
			tasks::TaskActionResponse
		)
	),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Engine", description = "Stateless authorization engine contracts"),
		(name = "Tasks", description = "Task access and assignment")
	)
)]
pub struct ApiDoc;

/// The generated document with the bearer scheme the task endpoints use.
pub fn openapi_json() -> Value {
	let mut doc = match serde_json::to_value(ApiDoc::openapi()) {
		Ok(doc) => doc,
		Err(err) => {
			tracing::error!("failed to serialize OpenAPI document: {}", err);
			return json!({});
		}
	};

	ensure_security_components(&mut doc);
	ensure_openapi_version(&mut doc);
	doc
}

pub fn swagger_routes() -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(openapi_json());

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else { return };

	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()));
	let Some(components) = components.as_object_mut() else { return };

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));
	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_openapi_version(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("openapi")
			.or_insert_with(|| Value::String("3.1.0".to_string()));
	}
}
