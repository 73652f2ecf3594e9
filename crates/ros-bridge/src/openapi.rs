use axum::extract::Json;

use serde_json::{Value, json};

fn name_parameter(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "in": "path",
        "required": true,
        "description": description,
        "schema": { "type": "string" },
    })
}

fn text_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": { "text/plain": { "schema": { "type": "string" } } },
    })
}

fn record_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/Record" } }
        },
    })
}

fn array_response(description: &str, items: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "type": "array", "items": { "$ref": items } }
            }
        },
    })
}

fn record_body() -> Value {
    json!({
        "required": true,
        "content": {
            "application/json": { "schema": { "$ref": "#/components/schemas/Record" } }
        },
    })
}

fn not_found() -> Value {
    text_response("Unknown device, alias or item, or operation not allowed.")
}

fn failure() -> Value {
    text_response("The device could not be reached or failed the command.")
}

fn bad_request() -> Value {
    text_response("The body is not a JSON object of strings.")
}

fn collection() -> Value {
    let list = json!({
        "summary": "List all items of an alias.",
        "responses": {
            "200": array_response("All items.", "#/components/schemas/Record"),
            "404": not_found(),
            "500": failure(),
        },
    });

    let create = json!({
        "summary": "Create an item.",
        "requestBody": record_body(),
        "responses": {
            "201": record_response("The created item."),
            "400": bad_request(),
            "404": not_found(),
            "500": failure(),
        },
    });

    json!({
        "parameters": [
            name_parameter("device", "Configured device name."),
            name_parameter("alias", "Configured alias name."),
        ],
        "get": list,
        "post": create,
    })
}

fn item() -> Value {
    let read = json!({
        "summary": "Read an item.",
        "responses": {
            "200": record_response("The item."),
            "404": not_found(),
            "500": failure(),
        },
    });

    let update = json!({
        "summary": "Update an item.",
        "requestBody": record_body(),
        "responses": {
            "202": record_response("The updated item."),
            "400": bad_request(),
            "404": not_found(),
            "500": failure(),
        },
    });

    let delete = json!({
        "summary": "Delete an item.",
        "responses": {
            "204": { "description": "The item was deleted." },
            "404": not_found(),
            "500": failure(),
        },
    });

    json!({
        "parameters": [
            name_parameter("device", "Configured device name."),
            name_parameter("alias", "Configured alias name."),
            name_parameter("id", "Item identifier, as returned by the device."),
        ],
        "get": read,
        "patch": update,
        "delete": delete,
    })
}

fn schemas() -> Value {
    let device = json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "address": { "type": "string" },
            "username": { "type": "string" },
            "password": { "type": "string" },
            "timeout": { "type": "number" },
            "tls": {
                "type": "object",
                "properties": {
                    "ca": { "type": "string" },
                    "verify": { "type": "boolean" },
                },
            },
        },
    });

    let alias = json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "path": { "type": "string" },
            "create": { "type": "boolean" },
            "update": { "type": "boolean" },
            "delete": { "type": "boolean" },
        },
    });

    json!({
        "Record": { "type": "object", "additionalProperties": { "type": "string" } },
        "Device": device,
        "Alias": alias,
    })
}

/// Returns the OpenAPI 3 document describing the REST interface.
#[must_use]
pub fn describe() -> Value {
    let devices = json!({
        "get": {
            "summary": "List the configured devices, with masked passwords.",
            "responses": {
                "200": array_response("Configured devices.", "#/components/schemas/Device"),
            },
        },
    });

    let aliases = json!({
        "get": {
            "summary": "List the configured aliases.",
            "responses": {
                "200": {
                    "description": "Configured aliases, by name.",
                    "content": {
                        "application/json": {
                            "schema": {
                                "type": "object",
                                "additionalProperties": { "$ref": "#/components/schemas/Alias" },
                            }
                        }
                    },
                },
            },
        },
    });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "ros-bridge",
            "description": "Generic REST access to RouterOS configuration trees.",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/api/v1/devices": devices,
            "/api/v1/aliases": aliases,
            "/api/v1/devices/{device}/{alias}": collection(),
            "/api/v1/devices/{device}/{alias}/{id}": item(),
        },
        "components": { "schemas": schemas() },
    })
}

pub(crate) async fn document() -> Json<Value> {
    Json(describe())
}
