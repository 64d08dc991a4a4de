//! Live-plot figure registry: which log series are bundled into which
//! figure, with what axis scaling and ring-buffer depth. Requires schema
//! v4.1+; the periodic live-plot task reads this to know what to render.

use crate::error::{Result, StoreError};
use crate::schema;
use crate::Store;

/// Y-axis scaling mode for a registered figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YScale {
    Auto,
    Fixed,
}

impl YScale {
    fn as_str(&self) -> &'static str {
        match self {
            YScale::Auto => "auto",
            YScale::Fixed => "fixed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "fixed" => YScale::Fixed,
            _ => YScale::Auto,
        }
    }
}

/// A registered figure: one plot window holding one or more named series.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureSpec {
    pub fignum: i64,
    pub maxvalues: u32,
    pub yscale: YScale,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
    pub variables: Vec<String>,
}

impl Store {
    /// Register (or replace) a figure's configuration and variable list.
    pub fn set_figure(&self, spec: &FigureSpec) -> Result<()> {
        self.check_writable()?;
        let version = self.version_checked();
        if !schema::supports_figures(version) {
            return Err(StoreError::FiguresUnsupported { version });
        }
        let conn = self.conn();
        let guard = conn.lock();
        guard.execute_batch("BEGIN")?;
        let result = (|| -> Result<()> {
            guard.execute(
                "INSERT INTO figure (fignum, maxvalues, yscale, ymin, ymax)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(fignum) DO UPDATE SET
                    maxvalues = excluded.maxvalues,
                    yscale = excluded.yscale,
                    ymin = excluded.ymin,
                    ymax = excluded.ymax",
                rusqlite::params![
                    spec.fignum,
                    spec.maxvalues,
                    spec.yscale.as_str(),
                    spec.ymin,
                    spec.ymax
                ],
            )?;
            guard.execute(
                "DELETE FROM figure_variable WHERE fignum = ?1",
                [spec.fignum],
            )?;
            for name in &spec.variables {
                guard.execute(
                    "INSERT INTO figure_variable (fignum, name) VALUES (?1, ?2)",
                    rusqlite::params![spec.fignum, name],
                )?;
            }
            Ok(())
        })();
        match &result {
            Ok(()) => guard.execute_batch("COMMIT")?,
            Err(_) => guard.execute_batch("ROLLBACK")?,
        }
        result
    }

    /// All registered figures in `fignum` order, populated with their
    /// variable lists. A pre-v4.1 schema has no figure registry at all, so
    /// this degrades to empty rather than erroring.
    pub fn figures(&self) -> Result<Vec<FigureSpec>> {
        let version = self.version_checked();
        if !schema::supports_figures(version) {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let guard = conn.lock();
        let mut stmt = guard.prepare(
            "SELECT fignum, maxvalues, yscale, ymin, ymax FROM figure ORDER BY fignum",
        )?;
        let mut specs = stmt
            .query_map([], |row| {
                Ok(FigureSpec {
                    fignum: row.get(0)?,
                    maxvalues: row.get(1)?,
                    yscale: YScale::from_str(&row.get::<_, String>(2)?),
                    ymin: row.get(3)?,
                    ymax: row.get(4)?,
                    variables: Vec::new(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut var_stmt = guard.prepare(
            "SELECT name FROM figure_variable WHERE fignum = ?1 ORDER BY varnum",
        )?;
        for spec in &mut specs {
            spec.variables = var_stmt
                .query_map([spec.fignum], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }
        Ok(specs)
    }

    /// Drop every registered figure. Used when a session's live-plot
    /// layout is reconfigured from scratch rather than incrementally.
    pub fn clear_figures(&self) -> Result<()> {
        self.check_writable()?;
        let version = self.version_checked();
        if !schema::supports_figures(version) {
            return Err(StoreError::FiguresUnsupported { version });
        }
        let conn = self.conn();
        let guard = conn.lock();
        guard.execute("DELETE FROM figure_variable", [])?;
        guard.execute("DELETE FROM figure", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpenMode;

    #[test]
    fn figure_registration_round_trips_with_variables() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        store
            .set_figure(&FigureSpec {
                fignum: 1,
                maxvalues: 500,
                yscale: YScale::Fixed,
                ymin: Some(0.0),
                ymax: Some(100.0),
                variables: vec!["temp".into(), "pressure".into()],
            })
            .unwrap();
        let figs = store.figures().unwrap();
        assert_eq!(figs.len(), 1);
        assert_eq!(figs[0].variables, vec!["temp", "pressure"]);
    }

    #[test]
    fn re_registering_a_figure_replaces_its_variables() {
        let store = Store::open(None, OpenMode::CreateIfMissing, false).unwrap();
        let mut spec = FigureSpec {
            fignum: 1,
            maxvalues: 100,
            yscale: YScale::Auto,
            ymin: None,
            ymax: None,
            variables: vec!["a".into()],
        };
        store.set_figure(&spec).unwrap();
        spec.variables = vec!["b".into(), "c".into()];
        store.set_figure(&spec).unwrap();
        let figs = store.figures().unwrap();
        assert_eq!(figs.len(), 1);
        assert_eq!(figs[0].variables, vec!["b", "c"]);
    }

    #[test]
    fn figures_degrade_to_empty_on_pre_v4_1_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v4.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            crate::schema::create_for_version(&conn, 4.0).unwrap();
        }
        let store = Store::open(Some(&path), OpenMode::ReadWrite, false).unwrap();
        assert_eq!(store.figures().unwrap(), Vec::new());
    }

    #[test]
    fn set_figure_still_errors_on_pre_v4_1_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v4.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            crate::schema::create_for_version(&conn, 4.0).unwrap();
        }
        let store = Store::open(Some(&path), OpenMode::ReadWrite, false).unwrap();
        let err = store
            .set_figure(&FigureSpec {
                fignum: 1,
                maxvalues: 10,
                yscale: YScale::Auto,
                ymin: None,
                ymax: None,
                variables: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::FiguresUnsupported { version } if version == 4.0));
    }
}
