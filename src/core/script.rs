use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use mlua::{Lua, LuaOptions, LuaSerdeExt, StdLib, Table, Value};

use crate::core::config::GameConfig;

/// The init script is always fetched from the same place, before anything
/// else runs.
pub const INIT_FILENAME: &str = "shared/init.lua";

const CONFIG_GLOBAL: &str = "config";
const GAME_GLOBAL: &str = "Game";

/// The embedded Lua engine plus the virtual filesystem scripts are mounted
/// into. Mounted sources are what `exec_file` and `require` resolve against;
/// nothing is ever read from disk.
#[derive(Debug)]
pub struct ScriptHost {
    lua: Lua,
    mounted: Rc<RefCell<HashMap<String, String>>>,
}

impl ScriptHost {
    pub fn new() -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        let mounted = Rc::new(RefCell::new(HashMap::new()));
        install_searcher(&lua, Rc::clone(&mounted))?;
        Ok(Self { lua, mounted })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn mount(&self, path: impl Into<String>, source: impl Into<String>) {
        self.mounted.borrow_mut().insert(path.into(), source.into());
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        self.mounted.borrow().contains_key(path)
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted.borrow().len()
    }

    /// Execute a mounted file as a chunk named after its path.
    pub fn exec_file(&self, path: &str) -> Result<()> {
        let source = self.mounted.borrow().get(path).cloned();
        let Some(source) = source else {
            bail!("script '{path}' is not mounted");
        };
        self.lua
            .load(source)
            .set_name(format!("@{path}"))
            .exec()
            .with_context(|| format!("error executing '{path}'"))
    }

    /// The config table the init script is expected to leave behind.
    pub fn config(&self) -> Result<GameConfig> {
        let value: Value = self.lua.globals().get(CONFIG_GLOBAL)?;
        if value.is_nil() {
            bail!("init script did not define a '{CONFIG_GLOBAL}' global");
        }
        let config: GameConfig = self
            .lua
            .from_value(value)
            .with_context(|| format!("invalid '{CONFIG_GLOBAL}' table"))?;
        config.validate()?;
        Ok(config)
    }

    /// The game handle the entry script is expected to leave behind.
    pub fn game_table(&self) -> Result<Table> {
        let value: Value = self.lua.globals().get(GAME_GLOBAL)?;
        match value {
            Value::Table(table) => Ok(table),
            Value::Nil => bail!("entry script did not define a '{GAME_GLOBAL}' global"),
            other => bail!(
                "'{GAME_GLOBAL}' global is a {}, expected a table",
                other.type_name()
            ),
        }
    }
}

/// Let `require` find mounted files: module `a.b` resolves to `a/b.lua`.
fn install_searcher(lua: &Lua, mounted: Rc<RefCell<HashMap<String, String>>>) -> Result<()> {
    let searcher = lua.create_function(move |lua, name: String| {
        let path = name.replace('.', "/") + ".lua";
        let source = mounted.borrow().get(&path).cloned();
        match source {
            Some(source) => {
                let loader = lua.load(source).set_name(format!("@{path}")).into_function()?;
                Ok(Value::Function(loader))
            }
            None => Ok(Value::String(
                lua.create_string(format!("no mounted file '{path}'"))?,
            )),
        }
    })?;
    let package: Table = lua.globals().get("package")?;
    let searchers: Table = package.get("searchers")?;
    searchers.raw_insert(2, searcher)?;
    Ok(())
}
