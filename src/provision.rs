//! Site provisioning: one throwaway WordPress install per theme, driven through `wp`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::types::CatalogEntry;
use crate::config::{DatabaseSettings, Settings, SiteSettings};
use crate::error::{PipelineError, Result};
use crate::process::{run_with_retry, CommandRunner, ToolCommand};

const IMPORTER_PLUGIN: &str = "wordpress-importer";

/// Where a theme's test site lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSite {
    pub instance: String,
    pub url: String,
    pub path: PathBuf,
    pub db_prefix: String,
}

impl TestSite {
    pub fn new(basedir: &Path, baseurl: &str, theme: &CatalogEntry) -> Self {
        let instance = theme.instance_name();
        Self {
            url: format!("{baseurl}{instance}"),
            path: basedir.join(&instance),
            db_prefix: theme.db_prefix(),
            instance,
        }
    }

    pub fn for_settings(settings: &Settings, theme: &CatalogEntry) -> Self {
        Self::new(
            &settings.paths.testsite_basedir,
            &settings.paths.testsite_baseurl,
            theme,
        )
    }
}

pub struct SiteProvisioner {
    runner: Arc<dyn CommandRunner>,
    wp_cli: String,
    basedir: PathBuf,
    baseurl: String,
    db: DatabaseSettings,
    site: SiteSettings,
    import_file: PathBuf,
    retries: u8,
}

impl SiteProvisioner {
    pub fn new(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            wp_cli: settings.wordpress.cli.clone(),
            basedir: settings.paths.testsite_basedir.clone(),
            baseurl: settings.paths.testsite_baseurl.clone(),
            db: settings.database.clone(),
            site: settings.site.clone(),
            import_file: settings.import_file(),
            retries: 1,
        }
    }

    /// Installing needs both secrets; an empty one is a configuration error.
    fn check_secrets(&self) -> Result<()> {
        if self.runner.is_dry_run() {
            return Ok(());
        }
        if self.db.password.is_empty() {
            return Err(PipelineError::Config(
                "database.password is empty (set THEMETEST_DB_PASSWORD)".into(),
            ));
        }
        if self.site.admin_password.is_empty() {
            return Err(PipelineError::Config(
                "site.admin_password is empty (set THEMETEST_ADMIN_PASSWORD)".into(),
            ));
        }
        Ok(())
    }

    pub fn site_for(&self, theme: &CatalogEntry) -> TestSite {
        TestSite::new(&self.basedir, &self.baseurl, theme)
    }

    fn wp(&self, site_path: &Path) -> ToolCommand {
        ToolCommand::new(&self.wp_cli).flag("path", site_path.display())
    }

    /// The full `wp` sequence for one site, in execution order.
    pub fn commands(&self, theme: &CatalogEntry) -> Vec<ToolCommand> {
        let site = self.site_for(theme);
        vec![
            self.wp(&site.path).args(["core", "download"]),
            self.wp(&site.path)
                .args(["core", "config"])
                .flag("dbhost", &self.db.host)
                .flag("dbname", &self.db.name)
                .flag("dbprefix", &site.db_prefix)
                .flag("dbuser", &self.db.user)
                .flag("dbpass", &self.db.password),
            self.wp(&site.path)
                .args(["core", "install"])
                .flag("url", &site.url)
                .flag("title", &self.site.title)
                .flag("admin_name", &self.site.admin_user)
                .flag("admin_password", &self.site.admin_password)
                .flag("admin_email", &self.site.admin_email),
            self.wp(&site.path)
                .args(["theme", "install", theme.slug.as_str(), "--activate"]),
            self.wp(&site.path)
                .args(["plugin", "install", IMPORTER_PLUGIN, "--activate"]),
            self.wp(&site.path)
                .arg("import")
                .arg(self.import_file.display().to_string())
                .arg("--authors=skip"),
        ]
    }

    /// Install WordPress plus the theme and sample content. Each step is retried once.
    pub async fn provision(&self, theme: &CatalogEntry) -> Result<TestSite> {
        self.check_secrets()?;
        let site = self.site_for(theme);
        tracing::info!(slug = %theme.slug, instance = %site.instance, url = %site.url, "installing test site");
        for cmd in self.commands(theme) {
            run_with_retry(self.runner.as_ref(), &cmd, self.retries).await?;
        }
        Ok(site)
    }

    /// Reset the shared test database and delete every site directory.
    /// Returns the directories removed (or that would be removed in a dry run).
    pub async fn cleanup(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.basedir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(basedir = %self.basedir.display(), "no test site directory, nothing to clean");
                return Ok(dirs);
            }
            Err(e) => {
                return Err(PipelineError::io(
                    format!("listing {}", self.basedir.display()),
                    e,
                ))
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io("reading test site entry", e))?
        {
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let Some(first) = dirs.first() else {
            tracing::info!("no test sites found");
            return Ok(dirs);
        };

        // All sites share one database, so resetting through any of them clears it.
        run_with_retry(
            self.runner.as_ref(),
            &self.wp(first).args(["db", "reset", "--yes"]),
            self.retries,
        )
        .await?;
        run_with_retry(
            self.runner.as_ref(),
            &self.wp(first).args(["db", "optimize"]),
            self.retries,
        )
        .await?;

        for dir in &dirs {
            if self.runner.is_dry_run() {
                tracing::info!(dir = %dir.display(), "dry run, would delete");
                continue;
            }
            tracing::info!(dir = %dir.display(), "deleting test site");
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(format!("deleting {}", dir.display()), e))?;
        }
        Ok(dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DryRunRunner;

    fn theme(slug: &str) -> CatalogEntry {
        serde_json::from_value(serde_json::json!({"slug": slug, "name": slug})).unwrap()
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.paths.testsite_basedir = PathBuf::from("/srv/sites");
        s.paths.testsite_baseurl = "http://sites.test/".into();
        s.database.password = "dbpw".into();
        s.site.admin_password = "adminpw".into();
        s
    }

    #[test]
    fn site_layout_follows_instance_name() {
        let p = SiteProvisioner::new(&settings(), Arc::new(DryRunRunner::new()));
        let site = p.site_for(&theme("hello-elementor"));
        assert_eq!(site.instance, "hello-elementor01");
        assert_eq!(site.url, "http://sites.test/hello-elementor01");
        assert_eq!(site.path, PathBuf::from("/srv/sites/hello-elementor01"));
        assert_eq!(site.db_prefix, "helloelementor01_");
    }

    #[test]
    fn arguments_are_passed_as_separate_values() {
        let p = SiteProvisioner::new(&settings(), Arc::new(DryRunRunner::new()));
        let cmds = p.commands(&theme("astra"));
        assert_eq!(cmds.len(), 6);
        assert!(cmds[1].args.contains(&"--dbprefix=astra01_".to_string()));
        // A title with spaces stays a single argument.
        assert!(cmds[2].args.contains(&"--title=Your Blog Title".to_string()));
        assert_eq!(
            cmds[3].args,
            vec!["--path=/srv/sites/astra01", "theme", "install", "astra", "--activate"]
        );
    }

    #[tokio::test]
    async fn real_run_requires_secrets() {
        let mut s = settings();
        s.database.password.clear();
        let p = SiteProvisioner::new(&s, Arc::new(crate::process::SystemRunner::default()));
        let err = p.provision(&theme("astra")).await.unwrap_err();
        assert!(err.is_batch_fatal());
    }

    #[tokio::test]
    async fn dry_run_cleanup_keeps_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("astra01")).unwrap();
        std::fs::create_dir(dir.path().join("neve01")).unwrap();
        let mut s = settings();
        s.paths.testsite_basedir = dir.path().to_path_buf();
        let runner = Arc::new(DryRunRunner::new());
        let p = SiteProvisioner::new(&s, runner.clone());

        let listed = p.cleanup().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(dir.path().join("astra01").exists());
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].args.ends_with(&["db".into(), "reset".into(), "--yes".into()]));
    }
}
