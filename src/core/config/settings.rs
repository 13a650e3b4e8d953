use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_u16,
    parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, GatewaySettings, RedisSettings, RuntimeSettings,
    SecuritySettings, ServerHost, ServerPort, ServerSettings, SessionSettings, Settings,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PORTAL_HOST", "0.0.0.0");
        let port = env_or_default("PORTAL_PORT", "8000");

        let environment =
            parse_environment(env_optional("PORTAL_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PORTAL_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Portal Session API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let jwt_secret = env_or_default("IDP_JWT_SECRET", "");
        let algorithm = env_or_default("IDP_JWT_ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let gateway_base_url = env_or_default("EXAM_API_BASE_URL", "http://localhost:5000/api");
        let gateway_timeout_seconds =
            parse_u64("EXAM_API_TIMEOUT_SECONDS", env_or_default("EXAM_API_TIMEOUT_SECONDS", "30"))?;

        let heartbeat_interval_ms = parse_u64(
            "TAB_HEARTBEAT_INTERVAL_MS",
            env_or_default("TAB_HEARTBEAT_INTERVAL_MS", "5000"),
        )?;
        let stale_timeout_ms =
            parse_u64("TAB_STALE_TIMEOUT_MS", env_or_default("TAB_STALE_TIMEOUT_MS", "30000"))?;
        let max_violations =
            parse_u32("MAX_SECURITY_VIOLATIONS", env_or_default("MAX_SECURITY_VIOLATIONS", "5"))?;
        let tab_switch_throttle_ms =
            parse_u64("TAB_SWITCH_THROTTLE_MS", env_or_default("TAB_SWITCH_THROTTLE_MS", "2000"))?;
        let time_sync_interval_seconds = parse_u64(
            "TIME_SYNC_INTERVAL_SECONDS",
            env_or_default("TIME_SYNC_INTERVAL_SECONDS", "30"),
        )?;
        let claim_rate_limit_per_minute = parse_u64(
            "CLAIM_RATE_LIMIT_PER_MINUTE",
            env_or_default("CLAIM_RATE_LIMIT_PER_MINUTE", "60"),
        )?;

        let log_level = env_or_default("PORTAL_LOG_LEVEL", "info");
        let json = env_optional("PORTAL_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { jwt_secret, algorithm },
            cors: CorsSettings { origins: cors_origins },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            gateway: GatewaySettings {
                base_url: gateway_base_url,
                timeout_seconds: gateway_timeout_seconds,
            },
            session: SessionSettings {
                heartbeat_interval_ms,
                stale_timeout_ms,
                max_violations,
                tab_switch_throttle_ms,
                time_sync_interval_seconds,
                claim_rate_limit_per_minute,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn gateway(&self) -> &GatewaySettings {
        &self.gateway
    }

    pub(crate) fn session(&self) -> &SessionSettings {
        &self.session
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TAB_HEARTBEAT_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        if self.session.stale_timeout_ms <= self.session.heartbeat_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "TAB_STALE_TIMEOUT_MS",
                value: self.session.stale_timeout_ms.to_string(),
            });
        }

        if self.session.max_violations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_SECURITY_VIOLATIONS",
                value: "0".to_string(),
            });
        }

        if self.session.time_sync_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TIME_SYNC_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.security.algorithm != "HS256" {
            return Err(ConfigError::InvalidValue {
                field: "IDP_JWT_ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::MissingSecret("IDP_JWT_SECRET"));
        }
        if self.gateway.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("EXAM_API_BASE_URL"));
        }

        Ok(())
    }
}
