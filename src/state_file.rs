use crate::prelude::*;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps the latest sample as pretty JSON in a file, overwritten on every poll. Other tools
/// read it to show the current state of the controller.
#[derive(Debug)]
pub struct StateFileWriter {
    path: PathBuf,
    writes: AtomicU64,
}

impl StateFileWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("writing status to {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path: PathBuf::from(path),
            writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Replaces the file contents; readers never see a half-written file.
    pub async fn write(&self, data: &RenogyData) -> Result<()> {
        let json = data.to_json(true)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");

        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|err| anyhow!("failed to write {:?}: {}", tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| anyhow!("failed to replace {}: {}", self.path.display(), err))?;

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("status written to {} ({} writes)", self.path.display(), writes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renogy::dummy::DummyRenogyClient;
    use tempfile::TempDir;

    #[tokio::test]
    async fn overwrites_the_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested/status.json");
        let writer = StateFileWriter::new(path.to_str().unwrap())?;

        let mut client = DummyRenogyClient::new();
        let mut data = client.get_all_data(None).await?;
        writer.write(&data).await?;

        data.power_status.battery_soc = 42;
        writer.write(&data).await?;

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(json["powerStatus"]["batterySOC"], 42);
        assert_eq!(json["systemInfo"]["productModel"], "RENOGY ROVER");
        assert_eq!(writer.writes(), 2);

        Ok(())
    }
}
