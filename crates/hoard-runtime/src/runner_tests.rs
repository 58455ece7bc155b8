//! Unit tests for the adapter runner.

#[cfg(test)]
mod runtime_tests {
    use super::super::Runtime;

    #[test]
    fn binary_names() {
        assert_eq!(Runtime::Bun.binary(), "bun");
        assert_eq!(Runtime::Deno.binary(), "deno");
        assert_eq!(Runtime::Node.binary(), "node");
    }

    #[test]
    fn run_args_bun() {
        let args = Runtime::Bun.run_args();
        assert_eq!(args, vec!["run"]);
    }

    #[test]
    fn run_args_deno_allow_network() {
        let args = Runtime::Deno.run_args();
        assert!(args.contains(&"run"));
        assert!(args.contains(&"--allow-env"));
        assert!(args.contains(&"--allow-net"));
    }

    #[test]
    fn run_args_node() {
        let args = Runtime::Node.run_args();
        assert!(args.contains(&"--experimental-strip-types"));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Runtime::parse("bun"), Some(Runtime::Bun));
        assert_eq!(Runtime::parse("Deno"), Some(Runtime::Deno));
        assert_eq!(Runtime::parse("NODE"), Some(Runtime::Node));
    }

    #[test]
    fn parse_unknown_returns_none() {
        assert_eq!(Runtime::parse("unknown"), None);
        assert_eq!(Runtime::parse("python"), None);
        assert_eq!(Runtime::parse(""), None);
    }

    #[test]
    fn from_str_works() {
        assert_eq!("bun".parse::<Runtime>(), Ok(Runtime::Bun));
        assert!("unknown".parse::<Runtime>().is_err());
    }
}

#[cfg(test)]
mod adapter_request_tests {
    use super::super::{AdapterRequest, ListParams};

    #[test]
    fn info_request_serializes() {
        let json = serde_json::to_value(&AdapterRequest::Info).expect("serialize");
        assert_eq!(json["method"], "info");
    }

    #[test]
    fn authenticate_request_carries_settings() {
        let mut settings = serde_json::Map::new();
        settings.insert("profile".to_string(), serde_json::json!("work"));
        let json = serde_json::to_value(&AdapterRequest::Authenticate { settings }).expect("serialize");
        assert_eq!(json["method"], "authenticate");
        assert_eq!(json["params"]["settings"]["profile"], "work");
    }

    #[test]
    fn list_request_uses_millis_and_skips_unset() {
        let req = AdapterRequest::List {
            opts: ListParams {
                since: Some(1_700_000_000_000),
                until: None,
                limit: Some(10),
            },
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["method"], "list");
        assert_eq!(json["params"]["opts"]["since"], 1_700_000_000_000i64);
        assert_eq!(json["params"]["opts"]["limit"], 10);
        assert!(json["params"]["opts"].get("until").is_none());
    }

    #[test]
    fn resolve_media_request_is_camel_case() {
        let req = AdapterRequest::ResolveMedia {
            conversation_id: "c1".to_string(),
            attachment_id: "a1".to_string(),
            url: None,
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["method"], "resolveMedia");
        assert_eq!(json["params"]["conversationId"], "c1");
        assert_eq!(json["params"]["attachmentId"], "a1");
        assert_eq!(req.method(), "resolveMedia");
    }

    #[test]
    fn method_names_match_wire_tags() {
        for req in [
            AdapterRequest::Info,
            AdapterRequest::Fetch { id: "x".to_string() },
            AdapterRequest::Cleanup,
        ] {
            let json = serde_json::to_value(&req).expect("serialize");
            assert_eq!(json["method"], req.method());
        }
    }
}

#[cfg(test)]
mod reply_tests {
    use super::super::{AdapterFailure, AdapterInfo, parse_reply};

    #[test]
    fn payload_reply_decodes() {
        let json = r#"{"name":"claude","displayName":"Claude","version":"1.0.0","rateLimitSensitive":true}"#;
        let info: AdapterInfo = parse_reply(json).expect("decode");
        assert_eq!(info.name, "claude");
        assert!(info.rate_limit_sensitive);
    }

    #[test]
    fn error_reply_becomes_failure() {
        let json = r#"{"error":"session expired","kind":"auth"}"#;
        let err = parse_reply::<serde_json::Value>(json).expect_err("error reply");
        let failure = err.downcast_ref::<AdapterFailure>().expect("typed failure");
        assert_eq!(failure.kind, "auth");
        assert_eq!(failure.error, "session expired");
    }

    #[test]
    fn error_reply_without_kind_defaults_to_provider() {
        let err = parse_reply::<serde_json::Value>(r#"{"error":"boom"}"#).expect_err("error reply");
        let failure = err.downcast_ref::<AdapterFailure>().expect("typed failure");
        assert_eq!(failure.kind, "provider");
    }

    #[test]
    fn invalid_json_is_untyped_error() {
        let err = parse_reply::<serde_json::Value>("not json").expect_err("invalid");
        assert!(err.downcast_ref::<AdapterFailure>().is_none());
    }

    #[test]
    fn array_reply_with_error_field_inside_is_payload() {
        let json = r#"[{"id":"c1","error":"ignored","createdAt":1}]"#;
        let value: serde_json::Value = parse_reply(json).expect("decode");
        assert!(value.is_array());
    }
}

#[cfg(test)]
mod adapter_discovery_tests {
    use super::super::{AdapterRunner, Runtime};

    #[test]
    fn finds_and_lists_adapters() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        for (base, name) in [(&first, "claude"), (&second, "chatgpt"), (&second, "claude")] {
            let dir = base.path().join(name);
            std::fs::create_dir_all(&dir).expect("mkdir");
            std::fs::write(dir.join("adapter.ts"), "export {}").expect("write");
        }
        std::fs::create_dir_all(second.path().join("empty")).expect("mkdir");

        let runner = AdapterRunner::new(
            Runtime::Bun,
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );

        assert_eq!(
            runner.find_adapter("claude"),
            Some(first.path().join("claude").join("adapter.ts"))
        );
        assert!(runner.find_adapter("empty").is_none());
        assert_eq!(runner.list_adapters(), vec!["chatgpt", "claude"]);
    }
}
