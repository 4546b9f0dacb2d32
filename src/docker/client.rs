use crate::error::BuildError;
use bollard::Docker;
use serde::Serialize;
use tracing::debug;

/// Daemon facts reported by `stagebox check`
#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}

/// Connects using `DOCKER_HOST` or the platform's local socket
pub fn connect() -> Result<Docker, BuildError> {
    let docker = Docker::connect_with_local_defaults()?;
    debug!("Docker client created");
    Ok(docker)
}

/// Asks the daemon for its version; fails when it is unreachable
pub async fn daemon_info(docker: &Docker) -> Result<DaemonInfo, BuildError> {
    let version = docker.version().await?;
    let unknown = || "unknown".to_string();

    let info = DaemonInfo {
        version: version.version.unwrap_or_else(unknown),
        api_version: version.api_version.unwrap_or_else(unknown),
        os: version.os.unwrap_or_else(unknown),
        arch: version.arch.unwrap_or_else(unknown),
    };
    debug!("Docker {} (API {})", info.version, info.api_version);
    Ok(info)
}

/// True when a daemon answers; used to skip Docker-backed work
pub async fn is_available() -> bool {
    match connect() {
        Ok(docker) => match daemon_info(&docker).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Docker daemon not reachable: {}", e);
                false
            }
        },
        Err(e) => {
            debug!("Failed to create Docker client: {}", e);
            false
        }
    }
}

pub(crate) fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_is_available_does_not_panic() {
        // Succeeds or fails depending on whether Docker is running
        let _ = is_available().await;
    }

    #[test]
    fn test_is_not_found() {
        let missing = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: bot:latest".to_string(),
        };
        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(is_not_found(&missing));
        assert!(!is_not_found(&conflict));
    }
}
