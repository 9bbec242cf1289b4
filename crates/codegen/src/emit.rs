//! Low-level PL/pgSQL emission: blocks, indentation, procedure rendering.

/// Output of compiling a step list: hoisted declarations, body lines
/// (stored without base indentation), and whether a `return` was
/// reached so callers can flag dead code and skip the implicit return.
#[derive(Debug, Default)]
pub(crate) struct Block {
    pub decls: Vec<String>,
    pub body: Vec<String>,
    pub returned: bool,
}

impl Block {
    pub fn new() -> Self {
        Block::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.body.push(line.into());
    }
}

/// Append a child block's lines into `dst` at `level` extra indents.
/// A child that declared variables becomes a nested `DECLARE .. BEGIN ..
/// END` block so its bindings stay local, matching the scope model.
pub(crate) fn push_nested(dst: &mut Vec<String>, block: Block, level: usize) {
    if block.decls.is_empty() {
        for line in block.body {
            dst.push(indented(&line, level));
        }
    } else {
        dst.push(indented("DECLARE", level));
        for decl in block.decls {
            dst.push(indented(&decl, level + 1));
        }
        dst.push(indented("BEGIN", level));
        for line in block.body {
            dst.push(indented(&line, level + 1));
        }
        dst.push(indented("END;", level));
    }
}

pub(crate) fn indented(line: &str, levels: usize) -> String {
    if line.is_empty() {
        String::new()
    } else {
        format!("{}{}", "    ".repeat(levels), line)
    }
}

/// A procedure ready to render: everything is already SQL text.
#[derive(Debug)]
pub(crate) struct ProcedureDef {
    pub schema: String,
    pub name: String,
    /// Leading comment lines, without the `-- ` prefix.
    pub comments: Vec<String>,
    /// Rendered parameter declarations, e.g. `p_total NUMERIC DEFAULT NULL`.
    pub params: Vec<String>,
    /// Rendered variable declarations, e.g. `v_total NUMERIC := 0;`.
    pub decls: Vec<String>,
    /// Body lines without base indentation.
    pub body: Vec<String>,
}

impl ProcedureDef {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for comment in &self.comments {
            out.push_str(&format!("-- {}\n", comment));
        }
        out.push_str(&format!(
            "CREATE OR REPLACE FUNCTION {}.{}(\n",
            self.schema, self.name
        ));
        for (i, param) in self.params.iter().enumerate() {
            let sep = if i + 1 < self.params.len() { "," } else { "" };
            out.push_str(&format!("    {}{}\n", param, sep));
        }
        out.push_str(") RETURNS app.mutation_result\nLANGUAGE plpgsql\nAS $$\n");
        if !self.decls.is_empty() {
            out.push_str("DECLARE\n");
            for decl in &self.decls {
                out.push_str(&format!("    {}\n", decl));
            }
        }
        out.push_str("BEGIN\n");
        for line in &self.body {
            out.push_str(&indented(line, 1));
            out.push('\n');
        }
        // Runtime failures surface as a tagged result, never as an
        // unhandled exception reaching the caller.
        out.push_str("EXCEPTION WHEN OTHERS THEN\n");
        out.push_str(&format!(
            "    RETURN app.log_and_return_mutation('{}', 'error', jsonb_build_object('message', SQLERRM));\n",
            self.name.replace('\'', "''")
        ));
        out.push_str("END;\n$$;\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_minimal_procedure() {
        let proc = ProcedureDef {
            schema: "crm".to_string(),
            name: "noop".to_string(),
            comments: vec![],
            params: vec!["p_caller_id UUID DEFAULT NULL".to_string()],
            decls: vec![],
            body: vec!["RETURN app.log_and_return_mutation('noop', 'success', NULL::jsonb);".to_string()],
        };
        let sql = proc.render();
        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION crm.noop(\n"));
        assert!(!sql.contains("DECLARE"));
        assert!(sql.contains("RETURNS app.mutation_result"));
        assert!(sql.contains(
            "EXCEPTION WHEN OTHERS THEN\n    RETURN app.log_and_return_mutation('noop', 'error', jsonb_build_object('message', SQLERRM));"
        ));
        assert!(sql.ends_with("END;\n$$;\n"));
    }

    #[test]
    fn test_nested_block_wraps_declarations() {
        let mut dst = Vec::new();
        let mut block = Block::new();
        block.decls.push("v_x INTEGER;".to_string());
        block.push("v_x := 1;");
        push_nested(&mut dst, block, 1);
        assert_eq!(
            dst,
            vec![
                "    DECLARE",
                "        v_x INTEGER;",
                "    BEGIN",
                "        v_x := 1;",
                "    END;",
            ]
        );
    }

    #[test]
    fn test_nested_block_without_declarations_is_flat() {
        let mut dst = Vec::new();
        let mut block = Block::new();
        block.push("v_x := 1;");
        push_nested(&mut dst, block, 1);
        assert_eq!(dst, vec!["    v_x := 1;"]);
    }
}
