//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Accounts (multi-tenant, nested up to 5 levels)
CREATE TABLE IF NOT EXISTS accounts (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name VARCHAR(255) NOT NULL,
    parent_account_id UUID REFERENCES accounts(id),
    level INT NOT NULL DEFAULT 1 CHECK (level BETWEEN 1 AND 5),
    license_tier_id UUID,
    total_licenses INT NOT NULL DEFAULT 0,
    used_licenses INT NOT NULL DEFAULT 0,
    allocated_licenses INT NOT NULL DEFAULT 0,
    license_expires_at TIMESTAMPTZ,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Endpoints (managed machines)
CREATE TABLE IF NOT EXISTS endpoints (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    agent_id UUID UNIQUE,
    hostname VARCHAR(255) NOT NULL,
    mac_address VARCHAR(64),
    ip_address VARCHAR(45),
    os VARCHAR(20) NOT NULL,
    os_version VARCHAR(100),
    agent_version VARCHAR(50),
    status VARCHAR(20) NOT NULL DEFAULT 'online',
    last_seen_at TIMESTAMPTZ,
    registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Policies (typed configuration bundles)
CREATE TABLE IF NOT EXISTS policies (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    name VARCHAR(255) NOT NULL,
    description TEXT,
    type VARCHAR(50) NOT NULL,
    config JSONB NOT NULL DEFAULT '{}',
    is_default BOOLEAN NOT NULL DEFAULT false,
    is_active BOOLEAN NOT NULL DEFAULT true,
    created_by UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Policy assignments (many-to-many)
CREATE TABLE IF NOT EXISTS endpoint_policies (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    endpoint_id UUID NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    policy_id UUID NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    assigned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (endpoint_id, policy_id)
);

-- Threats (immutable detection events)
CREATE TABLE IF NOT EXISTS threats (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    endpoint_id UUID NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    name VARCHAR(500) NOT NULL,
    description TEXT,
    severity VARCHAR(20) NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'detected',
    file_path TEXT,
    file_hash VARCHAR(128),
    process_name VARCHAR(255),
    detection_engine VARCHAR(100),
    detected_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    resolved_at TIMESTAMPTZ,
    resolved_by UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Threat actions (append-only trail over threat status)
CREATE TABLE IF NOT EXISTS threat_actions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    threat_id UUID NOT NULL REFERENCES threats(id) ON DELETE CASCADE,
    action VARCHAR(20) NOT NULL,
    performed_by UUID,
    notes TEXT,
    performed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Audit Log
CREATE TABLE IF NOT EXISTS audit_logs (
    id BIGSERIAL PRIMARY KEY,
    account_id UUID REFERENCES accounts(id),
    user_id UUID,
    action VARCHAR(100) NOT NULL,
    entity_type VARCHAR(50),
    entity_id UUID,
    details JSONB,
    ip_address VARCHAR(45),
    user_agent TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- License allocations (parent -> child capacity transfers)
CREATE TABLE IF NOT EXISTS license_allocations (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    from_account_id UUID NOT NULL REFERENCES accounts(id),
    to_account_id UUID NOT NULL REFERENCES accounts(id),
    quantity INT NOT NULL CHECK (quantity > 0),
    allocated_by UUID,
    allocated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    revoked_at TIMESTAMPTZ,
    revoked_by UUID
);

-- Heartbeat telemetry (for analytics)
CREATE TABLE IF NOT EXISTS heartbeat_history (
    id BIGSERIAL PRIMARY KEY,
    endpoint_id UUID NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    agent_version VARCHAR(50),
    system_info JSONB,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_endpoints_identity
    ON endpoints(account_id, hostname, mac_address);
CREATE INDEX IF NOT EXISTS idx_endpoints_account ON endpoints(account_id);
CREATE INDEX IF NOT EXISTS idx_endpoints_last_seen ON endpoints(last_seen_at);
CREATE INDEX IF NOT EXISTS idx_endpoints_status ON endpoints(status);
CREATE INDEX IF NOT EXISTS idx_policies_account ON policies(account_id);
CREATE INDEX IF NOT EXISTS idx_policies_default ON policies(account_id, is_default, is_active);
CREATE INDEX IF NOT EXISTS idx_endpoint_policies_endpoint ON endpoint_policies(endpoint_id);
CREATE INDEX IF NOT EXISTS idx_threats_account ON threats(account_id, detected_at);
CREATE INDEX IF NOT EXISTS idx_threats_endpoint ON threats(endpoint_id);
CREATE INDEX IF NOT EXISTS idx_threats_severity ON threats(severity);
CREATE INDEX IF NOT EXISTS idx_threats_status ON threats(status);
CREATE INDEX IF NOT EXISTS idx_threat_actions_threat ON threat_actions(threat_id);
CREATE INDEX IF NOT EXISTS idx_audit_account ON audit_logs(account_id, created_at);
CREATE INDEX IF NOT EXISTS idx_allocations_from ON license_allocations(from_account_id);
CREATE INDEX IF NOT EXISTS idx_allocations_to ON license_allocations(to_account_id);
CREATE INDEX IF NOT EXISTS idx_heartbeat_history_endpoint ON heartbeat_history(endpoint_id, recorded_at);
"#;
