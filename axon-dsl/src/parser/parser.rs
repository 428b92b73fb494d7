//! Recursive-descent parser (§4.2).
//!
//! One procedure per grammar production, single-token lookahead, no error
//! recovery: the first failing `expect` returns `ParseError{expected,
//! found, line, column}` immediately. A `Parser{tokens, pos}` with
//! `peek`/`advance`/`expect(kind)` plus an `expect_field_name` that
//! widens identifier matching to keywords which double as field names in
//! a particular block — needed for `memory` (a context field and a
//! top-level keyword), `on_violation`, `ask`, `output`, `input`,
//! `refine`, `else`, and `where`.

use super::ast::*;
use crate::lexer::{CompareOp, DurationUnit, Keyword, Symbol, Token, TokenKind};
use axon_core::error::{ParseError, Position};
use axon_core::EffortLevel;
use std::collections::HashSet;

/// Parse a complete AXON source file into a [`Program`].
pub fn parse(source: &str) -> Result<Program, AxonParseFailure> {
    let tokens = crate::lexer::Lexer::new(source)
        .tokenize()
        .map_err(AxonParseFailure::Lex)?;
    Parser::new(tokens).parse_program().map_err(AxonParseFailure::Parse)
}

/// Either stage of front-end failure `parse` can hit.
#[derive(Debug, Clone)]
pub enum AxonParseFailure {
    Lex(axon_core::error::LexError),
    Parse(ParseError),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the whole token stream into a [`Program`]: an ordered
    /// sequence of declarations plus zero or more `run` statements (the
    /// IR generator, not the parser, enforces exactly one).
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut declarations = Vec::new();
        let mut run = Vec::new();

        while !self.is_at_end() {
            match &self.current().kind {
                TokenKind::Keyword(Keyword::Import) => {
                    declarations.push(Declaration::Import(self.parse_import()?))
                }
                TokenKind::Keyword(Keyword::Persona) => {
                    declarations.push(Declaration::Persona(self.parse_persona()?))
                }
                TokenKind::Keyword(Keyword::Context) => {
                    declarations.push(Declaration::Context(self.parse_context()?))
                }
                TokenKind::Keyword(Keyword::Anchor) => {
                    declarations.push(Declaration::Anchor(self.parse_anchor()?))
                }
                TokenKind::Keyword(Keyword::Memory) => {
                    declarations.push(Declaration::Memory(self.parse_memory_decl()?))
                }
                TokenKind::Keyword(Keyword::Tool) => {
                    declarations.push(Declaration::Tool(self.parse_tool()?))
                }
                TokenKind::Keyword(Keyword::Type) => {
                    declarations.push(Declaration::Type(self.parse_type_def()?))
                }
                TokenKind::Keyword(Keyword::Flow) => {
                    declarations.push(Declaration::Flow(self.parse_flow()?))
                }
                TokenKind::Keyword(Keyword::Run) => run.push(self.parse_run()?),
                _ => {
                    return Err(self.error(
                        "a top-level declaration (import/persona/context/anchor/memory/tool/type/flow/run)",
                    ))
                }
            }
        }

        Ok(Program { declarations, run })
    }

    // ========================================================================
    // Top-level declarations
    // ========================================================================

    fn parse_import(&mut self) -> Result<ImportDeclaration, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Import)?;
        let mut path = vec![self.expect_identifier()?];
        let mut names = None;

        while self.check_symbol(Symbol::Dot) {
            self.advance();
            if self.check_symbol(Symbol::LBrace) {
                // `import axon.anchors.{X, Y}`: the `.` before `{` is a
                // separator into a named-import list, not another path
                // segment (§4.2's critical disambiguation).
                self.advance();
                let mut list = Vec::new();
                while !self.check_symbol(Symbol::RBrace) {
                    list.push(self.expect_identifier()?);
                    self.optional_comma();
                }
                self.expect_symbol(Symbol::RBrace)?;
                names = Some(list);
                break;
            }
            path.push(self.expect_identifier()?);
        }

        Ok(ImportDeclaration { path, names, position })
    }

    fn parse_persona(&mut self) -> Result<PersonaDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Persona)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut domain = Vec::new();
        let mut tone = None;
        let mut confidence_threshold = None;
        let mut cite_sources = None;
        let mut refuse_if = Vec::new();
        let mut language = None;
        let mut description = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "domain" => domain = self.parse_string_list()?,
                "tone" => tone = Some(self.parse_tone()?),
                "confidence_threshold" => confidence_threshold = Some(self.expect_number()?),
                "cite_sources" => cite_sources = Some(self.expect_bool()?),
                "refuse_if" => refuse_if = self.parse_ident_list()?,
                "language" => language = Some(self.expect_string()?),
                "description" => description = Some(self.expect_string()?),
                other => return Err(self.error_owned(format!("a recognised persona field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(PersonaDefinition {
            name,
            domain,
            tone,
            confidence_threshold,
            cite_sources,
            refuse_if,
            language,
            description,
            position,
        })
    }

    fn parse_context(&mut self) -> Result<ContextDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Context)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut memory = None;
        let mut language = None;
        let mut depth = None;
        let mut max_tokens = None;
        let mut temperature = None;
        let mut cite_sources = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "memory" => memory = Some(self.parse_memory_scope()?),
                "language" => language = Some(self.expect_string()?),
                "depth" => depth = Some(self.parse_depth()?),
                "max_tokens" => max_tokens = Some(self.expect_integer()?),
                "temperature" => temperature = Some(self.expect_number()?),
                "cite_sources" => cite_sources = Some(self.expect_bool()?),
                other => return Err(self.error_owned(format!("a recognised context field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(ContextDefinition {
            name,
            memory,
            language,
            depth,
            max_tokens,
            temperature,
            cite_sources,
            position,
        })
    }

    fn parse_anchor(&mut self) -> Result<AnchorDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Anchor)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut require = None;
        let mut reject = Vec::new();
        let mut enforce = None;
        let mut confidence_floor = None;
        let mut unknown_response = None;
        let mut on_violation = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "require" => require = Some(self.expect_identifier()?),
                "reject" => reject = self.parse_ident_list()?,
                "enforce" => enforce = Some(self.expect_identifier()?),
                "confidence_floor" => confidence_floor = Some(self.expect_number()?),
                "unknown_response" => unknown_response = Some(self.expect_string()?),
                "on_violation" => on_violation = Some(self.parse_violation_strategy()?),
                other => return Err(self.error_owned(format!("a recognised anchor field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(AnchorDefinition {
            name,
            require,
            reject,
            enforce,
            confidence_floor,
            unknown_response,
            on_violation,
            position,
        })
    }

    fn parse_memory_decl(&mut self) -> Result<MemoryDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Memory)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut store = None;
        let mut backend = None;
        let mut retrieval = None;
        let mut decay = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "store" => store = Some(self.parse_memory_store_kind()?),
                "backend" => backend = Some(self.expect_identifier()?),
                "retrieval" => retrieval = Some(self.parse_retrieval_kind()?),
                "decay" => decay = Some(self.parse_decay()?),
                other => return Err(self.error_owned(format!("a recognised memory field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(MemoryDefinition {
            name,
            store,
            backend,
            retrieval,
            decay,
            position,
        })
    }

    fn parse_tool(&mut self) -> Result<ToolDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Tool)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut provider = None;
        let mut max_results = None;
        let mut filter = None;
        let mut timeout = None;
        let mut runtime = None;
        let mut sandbox = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "provider" => provider = Some(self.expect_identifier()?),
                "max_results" => max_results = Some(self.expect_integer()?),
                "filter" => filter = Some(self.parse_filter_spec()?),
                "timeout" => timeout = Some(self.expect_duration()?),
                "runtime" => runtime = Some(self.expect_identifier()?),
                "sandbox" => sandbox = Some(self.expect_bool()?),
                other => return Err(self.error_owned(format!("a recognised tool field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(ToolDefinition {
            name,
            provider,
            max_results,
            filter,
            timeout,
            runtime,
            sandbox,
            position,
        })
    }

    fn parse_type_def(&mut self) -> Result<TypeDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Type)?;
        let name = self.expect_identifier()?;

        let mut range = None;
        if self.check_symbol(Symbol::LParen) {
            self.advance();
            let lo = self.expect_number()?;
            self.expect_symbol(Symbol::Dot)?;
            self.expect_symbol(Symbol::Dot)?;
            let hi = self.expect_number()?;
            self.expect_symbol(Symbol::RParen)?;
            range = Some((lo, hi));
        }

        let mut predicate = None;
        if self.check_keyword(Keyword::Where) {
            self.advance();
            predicate = Some(self.parse_predicate()?);
        }

        let mut fields = Vec::new();
        if self.check_symbol(Symbol::LBrace) {
            self.advance();
            while !self.check_symbol(Symbol::RBrace) {
                let field_name = self.expect_identifier()?;
                self.expect_symbol(Symbol::Colon)?;
                let type_ref = self.parse_type_ref()?;
                let optional = matches!(type_ref, TypeRef::Optional(_));
                fields.push(FieldDef {
                    name: field_name,
                    type_ref,
                    optional,
                });
                self.optional_comma();
            }
            self.expect_symbol(Symbol::RBrace)?;
        }

        Ok(TypeDefinition {
            name,
            range,
            predicate,
            fields,
            position,
        })
    }

    fn parse_flow(&mut self) -> Result<FlowDefinition, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Flow)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LParen)?;

        let mut params = Vec::new();
        while !self.check_symbol(Symbol::RParen) {
            let param_name = self.expect_identifier()?;
            self.expect_symbol(Symbol::Colon)?;
            let type_ref = self.parse_type_ref()?;
            params.push(ParamDef { name: param_name, type_ref });
            self.optional_comma();
        }
        self.expect_symbol(Symbol::RParen)?;

        let mut return_type = None;
        if self.check_symbol(Symbol::Arrow) {
            self.advance();
            return_type = Some(self.parse_type_ref()?);
        }

        self.expect_symbol(Symbol::LBrace)?;
        let mut steps = Vec::new();
        while !self.check_symbol(Symbol::RBrace) {
            steps.push(self.parse_step()?);
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(FlowDefinition {
            name,
            params,
            return_type,
            steps,
            position,
        })
    }

    fn parse_run(&mut self) -> Result<RunStatement, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Run)?;
        let flow = self.expect_identifier()?;
        self.expect_symbol(Symbol::LParen)?;
        let mut args = Vec::new();
        while !self.check_symbol(Symbol::RParen) {
            args.push(self.parse_input_expr()?);
            self.optional_comma();
        }
        self.expect_symbol(Symbol::RParen)?;

        let mut persona = None;
        let mut context = None;
        let mut anchors = Vec::new();
        let mut on_failure = None;
        let mut on_failure_error = None;
        let mut output_to = None;
        let mut effort = None;

        loop {
            match &self.current().kind {
                TokenKind::Keyword(Keyword::As) => {
                    self.advance();
                    persona = Some(self.expect_identifier()?);
                }
                TokenKind::Keyword(Keyword::Within) => {
                    self.advance();
                    context = Some(self.expect_identifier()?);
                }
                TokenKind::Keyword(Keyword::ConstrainedBy) => {
                    self.advance();
                    self.expect_symbol(Symbol::LBracket)?;
                    while !self.check_symbol(Symbol::RBracket) {
                        anchors.push(self.expect_identifier()?);
                        self.optional_comma();
                    }
                    self.expect_symbol(Symbol::RBracket)?;
                }
                TokenKind::Keyword(Keyword::OnFailure) => {
                    self.advance();
                    self.expect_symbol(Symbol::Colon)?;
                    let (strategy, error_name) = self.parse_failure_strategy()?;
                    on_failure = Some(strategy);
                    on_failure_error = error_name;
                }
                TokenKind::Keyword(Keyword::OutputTo) => {
                    self.advance();
                    self.expect_symbol(Symbol::Colon)?;
                    output_to = Some(self.expect_string()?);
                }
                TokenKind::Keyword(Keyword::Effort) => {
                    self.advance();
                    self.expect_symbol(Symbol::Colon)?;
                    effort = Some(self.parse_effort_level()?);
                }
                _ => break,
            }
        }

        Ok(RunStatement {
            flow,
            args,
            persona,
            context,
            anchors,
            on_failure,
            on_failure_error,
            output_to,
            effort,
            position,
        })
    }

    // ========================================================================
    // Flow steps — a tagged choice on the leading keyword (§4.2)
    // ========================================================================

    fn parse_step(&mut self) -> Result<Step, ParseError> {
        match &self.current().kind {
            TokenKind::Keyword(Keyword::Step) => Ok(Step::Step(self.parse_step_def()?)),
            TokenKind::Keyword(Keyword::Probe) => Ok(Step::Probe(self.parse_probe_step()?)),
            TokenKind::Keyword(Keyword::Reason) => Ok(Step::Reason(self.parse_reason_step()?)),
            TokenKind::Keyword(Keyword::Validate) => Ok(Step::Validate(self.parse_validate_step()?)),
            TokenKind::Keyword(Keyword::Refine) => Ok(Step::Refine(self.parse_refine_step_node()?)),
            TokenKind::Keyword(Keyword::Weave) => Ok(Step::Weave(self.parse_weave_step()?)),
            TokenKind::Keyword(Keyword::Use) => Ok(Step::UseTool(self.parse_use_step()?)),
            TokenKind::Keyword(Keyword::Remember) => Ok(Step::Remember(self.parse_remember_step()?)),
            TokenKind::Keyword(Keyword::Recall) => Ok(Step::Recall(self.parse_recall_step()?)),
            TokenKind::Keyword(Keyword::If) => Ok(Step::If(self.parse_if_step()?)),
            _ => Err(self.error(
                "a flow step (step/probe/reason/validate/refine/weave/use/remember/recall/if)",
            )),
        }
    }

    fn parse_step_def(&mut self) -> Result<StepDef, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Step)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut ask = None;
        let mut inputs = Vec::new();
        let mut output = None;
        let mut refine = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "ask" => ask = Some(self.expect_string()?),
                "input" => inputs = self.parse_input_expr_list()?,
                "output" => output = Some(self.parse_type_ref()?),
                "refine" => refine = Some(self.parse_refine_block()?),
                other => return Err(self.error_owned(format!("a recognised step field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(StepDef {
            name,
            ask,
            inputs,
            output,
            refine,
            position,
        })
    }

    fn parse_probe_step(&mut self) -> Result<ProbeStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Probe)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut target = None;
        let mut fields = Vec::new();
        let mut output = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "target" => target = Some(self.parse_input_expr()?),
                "fields" => fields = self.parse_ident_list()?,
                "output" => output = Some(self.parse_type_ref()?),
                other => return Err(self.error_owned(format!("a recognised probe field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let target = target.ok_or_else(|| self.error("a 'target' field in probe step"))?;
        Ok(ProbeStep {
            name,
            target,
            fields,
            output,
            position,
        })
    }

    fn parse_reason_step(&mut self) -> Result<ReasonStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Reason)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut config = Vec::new();
        let mut output = None;
        let mut refine = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "output" => output = Some(self.parse_type_ref()?),
                "refine" => refine = Some(self.parse_refine_block()?),
                _ => config.push((field, self.parse_config_value()?)),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(ReasonStep {
            name,
            config,
            output,
            refine,
            position,
        })
    }

    fn parse_validate_step(&mut self) -> Result<ValidateStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Validate)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut expr = None;
        let mut schema = None;
        let mut rules = Vec::new();
        let mut refine = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "expr" => expr = Some(self.parse_input_expr()?),
                "schema" => schema = Some(self.parse_type_ref()?),
                "rules" => rules = self.parse_ident_list()?,
                "refine" => refine = Some(self.parse_refine_block()?),
                other => return Err(self.error_owned(format!("a recognised validate field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let expr = expr.ok_or_else(|| self.error("an 'expr' field in validate step"))?;
        Ok(ValidateStep {
            name,
            expr,
            schema,
            rules,
            refine,
            position,
        })
    }

    fn parse_refine_step_node(&mut self) -> Result<RefineStepNode, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Refine)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut target = None;
        let mut builder = RefineConfigBuilder::default();
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            if field == "target" {
                target = Some(self.parse_step_ref()?);
            } else {
                self.apply_refine_field(&field, &mut builder)?;
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let target = target.ok_or_else(|| self.error("a 'target' field in refine step"))?;
        Ok(RefineStepNode {
            name,
            target,
            config: builder.finish(),
            position,
        })
    }

    fn parse_weave_step(&mut self) -> Result<WeaveStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Weave)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut sources = Vec::new();
        let mut target = None;
        let mut config = Vec::new();
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "sources" => sources = self.parse_input_expr_list()?,
                "target" => target = Some(self.parse_type_ref()?),
                _ => config.push((field, self.parse_config_value()?)),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        Ok(WeaveStep {
            name,
            sources,
            target,
            config,
            position,
        })
    }

    fn parse_use_step(&mut self) -> Result<UseToolStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Use)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut tool = None;
        let mut argument = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "tool" => tool = Some(self.expect_identifier()?),
                "argument" => argument = Some(self.parse_input_expr()?),
                other => return Err(self.error_owned(format!("a recognised use field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let tool = tool.ok_or_else(|| self.error("a 'tool' field in use step"))?;
        let argument = argument.ok_or_else(|| self.error("an 'argument' field in use step"))?;
        Ok(UseToolStep {
            name,
            tool,
            argument,
            position,
        })
    }

    fn parse_remember_step(&mut self) -> Result<RememberStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Remember)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut expr = None;
        let mut memory = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "expr" => expr = Some(self.parse_input_expr()?),
                "memory" => memory = Some(self.expect_identifier()?),
                other => return Err(self.error_owned(format!("a recognised remember field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let expr = expr.ok_or_else(|| self.error("an 'expr' field in remember step"))?;
        let memory = memory.ok_or_else(|| self.error("a 'memory' field in remember step"))?;
        Ok(RememberStep {
            name,
            expr,
            memory,
            position,
        })
    }

    fn parse_recall_step(&mut self) -> Result<RecallStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::Recall)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut query = None;
        let mut memory = None;
        let mut output = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "query" => query = Some(self.parse_input_expr()?),
                "memory" => memory = Some(self.expect_identifier()?),
                "output" => output = Some(self.parse_type_ref()?),
                other => return Err(self.error_owned(format!("a recognised recall field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let query = query.ok_or_else(|| self.error("a 'query' field in recall step"))?;
        let memory = memory.ok_or_else(|| self.error("a 'memory' field in recall step"))?;
        Ok(RecallStep {
            name,
            query,
            memory,
            output,
            position,
        })
    }

    fn parse_if_step(&mut self) -> Result<IfStep, ParseError> {
        let position = self.position();
        self.expect_keyword(Keyword::If)?;
        let name = self.expect_identifier()?;
        self.expect_symbol(Symbol::LBrace)?;

        let mut condition = None;
        let mut then_step = None;
        let mut else_step = None;
        let mut seen = HashSet::new();

        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            match field.as_str() {
                "condition" => condition = Some(self.parse_condition()?),
                "then" => then_step = Some(Box::new(self.parse_step()?)),
                "else" => else_step = Some(Box::new(self.parse_step()?)),
                other => return Err(self.error_owned(format!("a recognised if field, found '{other}'"))),
            }
        }
        self.expect_symbol(Symbol::RBrace)?;

        let condition = condition.ok_or_else(|| self.error("a 'condition' field in if step"))?;
        let then_step = then_step.ok_or_else(|| self.error("a 'then' field in if step"))?;
        Ok(IfStep {
            name,
            condition,
            then_step,
            else_step,
            position,
        })
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let position = self.position();
        let left = self.parse_input_expr()?;
        let op = self.expect_compare_op()?;
        let right = self.parse_input_expr()?;
        Ok(Condition { left, op, right, position })
    }

    // ========================================================================
    // Refine configuration (standalone `refine` step and nested `refine {}`)
    // ========================================================================

    fn parse_refine_block(&mut self) -> Result<RefineConfig, ParseError> {
        self.expect_symbol(Symbol::LBrace)?;
        let mut builder = RefineConfigBuilder::default();
        let mut seen = HashSet::new();
        while !self.check_symbol(Symbol::RBrace) {
            let field = self.expect_field_name()?;
            self.require_unseen(&mut seen, &field)?;
            self.expect_symbol(Symbol::Colon)?;
            self.apply_refine_field(&field, &mut builder)?;
        }
        self.expect_symbol(Symbol::RBrace)?;
        Ok(builder.finish())
    }

    fn apply_refine_field(&mut self, field: &str, builder: &mut RefineConfigBuilder) -> Result<(), ParseError> {
        match field {
            "max_attempts" => builder.max_attempts = Some(self.expect_integer()? as u32),
            "backoff" => builder.backoff = Some(self.parse_backoff_spec()?),
            "pass_failure_context" => builder.pass_failure_context = Some(self.expect_bool()?),
            "on_exhaustion" => builder.on_exhaustion = Some(self.parse_exhaustion_strategy()?),
            other => return Err(self.error_owned(format!("a recognised refine field, found '{other}'"))),
        }
        Ok(())
    }

    fn parse_backoff_spec(&mut self) -> Result<BackoffSpec, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "none" => Ok(BackoffSpec::None),
            "linear" => {
                self.expect_symbol(Symbol::LParen)?;
                let n = self.expect_integer()? as u32;
                self.expect_symbol(Symbol::RParen)?;
                Ok(BackoffSpec::Linear(n))
            }
            "exponential" => {
                self.expect_symbol(Symbol::LParen)?;
                let base = self.expect_number()?;
                self.expect_symbol(Symbol::RParen)?;
                Ok(BackoffSpec::Exponential(base))
            }
            _ => Err(self.error("a backoff policy ('none', 'linear(n)', or 'exponential(base)')")),
        }
    }

    fn parse_exhaustion_strategy(&mut self) -> Result<ExhaustionStrategy, ParseError> {
        match &self.current().kind {
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                Ok(ExhaustionStrategy::Raise(self.expect_identifier()?))
            }
            TokenKind::Keyword(Keyword::Escalate) => {
                self.advance();
                Ok(ExhaustionStrategy::Escalate)
            }
            TokenKind::Keyword(Keyword::Fallback) => {
                self.advance();
                self.expect_symbol(Symbol::LParen)?;
                let value = self.parse_config_value()?;
                self.expect_symbol(Symbol::RParen)?;
                Ok(ExhaustionStrategy::Fallback(value))
            }
            _ => Err(self.error("'raise <Err>', 'escalate', or 'fallback(value)'")),
        }
    }

    // ========================================================================
    // Shared expression / value grammar
    // ========================================================================

    fn parse_input_expr_list(&mut self) -> Result<Vec<InputExpr>, ParseError> {
        self.expect_symbol(Symbol::LBracket)?;
        let mut items = Vec::new();
        while !self.check_symbol(Symbol::RBracket) {
            items.push(self.parse_input_expr()?);
            self.optional_comma();
        }
        self.expect_symbol(Symbol::RBracket)?;
        Ok(items)
    }

    fn parse_input_expr(&mut self) -> Result<InputExpr, ParseError> {
        match self.current().kind.clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(InputExpr::Literal(Literal::Str(s)))
            }
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(InputExpr::Literal(Literal::Int(n)))
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(InputExpr::Literal(Literal::Float(n)))
            }
            TokenKind::BooleanLiteral(b) => {
                self.advance();
                Ok(InputExpr::Literal(Literal::Bool(b)))
            }
            TokenKind::DurationLiteral { amount, unit } => {
                self.advance();
                Ok(InputExpr::Literal(Literal::Duration(amount, unit)))
            }
            TokenKind::Identifier(name) => {
                let position = self.position();
                self.advance();
                if self.check_symbol(Symbol::Dot) {
                    self.advance();
                    let field = self.expect_identifier()?;
                    Ok(InputExpr::StepOutput(StepRef {
                        step_name: name,
                        field,
                        position,
                    }))
                } else {
                    Ok(InputExpr::Identifier(name))
                }
            }
            _ => Err(self.error("a literal, identifier, or step-output reference ('Step.field')")),
        }
    }

    fn parse_step_ref(&mut self) -> Result<StepRef, ParseError> {
        let position = self.position();
        let step_name = self.expect_identifier()?;
        self.expect_symbol(Symbol::Dot)?;
        let field = self.expect_identifier()?;
        Ok(StepRef { step_name, field, position })
    }

    fn parse_config_value(&mut self) -> Result<ConfigValue, ParseError> {
        match self.current().kind.clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(ConfigValue::Str(s))
            }
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(ConfigValue::Int(n))
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(ConfigValue::Float(n))
            }
            TokenKind::BooleanLiteral(b) => {
                self.advance();
                Ok(ConfigValue::Bool(b))
            }
            TokenKind::DurationLiteral { amount, unit } => {
                self.advance();
                Ok(ConfigValue::Duration(amount, unit))
            }
            TokenKind::Symbol(Symbol::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check_symbol(Symbol::RBracket) {
                    items.push(self.parse_config_value()?);
                    self.optional_comma();
                }
                self.expect_symbol(Symbol::RBracket)?;
                Ok(ConfigValue::List(items))
            }
            TokenKind::Identifier(s) => {
                self.advance();
                Ok(ConfigValue::Ident(s))
            }
            _ => Err(self.error("a config value")),
        }
    }

    fn parse_type_ref(&mut self) -> Result<TypeRef, ParseError> {
        let name = self.expect_identifier()?;
        let mut type_ref = if (name == "List" || name == "Optional") && self.check_compare(CompareOp::Lt) {
            self.advance();
            let inner = self.parse_type_ref()?;
            self.expect_compare(CompareOp::Gt)?;
            if name == "List" {
                TypeRef::List(Box::new(inner))
            } else {
                TypeRef::Optional(Box::new(inner))
            }
        } else {
            TypeRef::Named(name)
        };

        // `T?` sugar for `Optional<T>`.
        if self.check_symbol(Symbol::Question) {
            self.advance();
            type_ref = TypeRef::Optional(Box::new(type_ref));
        }
        Ok(type_ref)
    }

    fn parse_predicate(&mut self) -> Result<Predicate, ParseError> {
        let mut left = self.parse_predicate_atom()?;
        while let TokenKind::Identifier(s) = &self.current().kind {
            if s != "and" {
                break;
            }
            self.advance();
            let right = self.parse_predicate_atom()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_predicate_atom(&mut self) -> Result<Predicate, ParseError> {
        if let TokenKind::Identifier(name) = self.current().kind.clone() {
            if name == "empty" {
                self.advance();
                self.expect_symbol(Symbol::LParen)?;
                let field = self.expect_identifier()?;
                self.expect_symbol(Symbol::RParen)?;
                return Ok(Predicate::Empty(field));
            }
            if name == "member_of" {
                self.advance();
                self.expect_symbol(Symbol::LParen)?;
                let field = self.expect_identifier()?;
                self.expect_symbol(Symbol::Comma)?;
                let set = self.parse_ident_list()?;
                self.expect_symbol(Symbol::RParen)?;
                return Ok(Predicate::MemberOf(field, set));
            }
        }
        let field = self.expect_identifier()?;
        let op = self.expect_compare_op()?;
        let literal = self.expect_number()?;
        Ok(Predicate::Compare(field, op, literal))
    }

    fn parse_tone(&mut self) -> Result<Tone, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "precise" => Ok(Tone::Precise),
            "friendly" => Ok(Tone::Friendly),
            "technical" => Ok(Tone::Technical),
            "conversational" => Ok(Tone::Conversational),
            "formal" => Ok(Tone::Formal),
            "creative" => Ok(Tone::Creative),
            _ => Err(self.error(
                "a tone (precise|friendly|technical|conversational|formal|creative)",
            )),
        }
    }

    fn parse_memory_scope(&mut self) -> Result<MemoryScope, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "session" => Ok(MemoryScope::Session),
            "persistent" => Ok(MemoryScope::Persistent),
            "none" => Ok(MemoryScope::None),
            _ => Err(self.error("a memory scope (session|persistent|none)")),
        }
    }

    fn parse_depth(&mut self) -> Result<Depth, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "shallow" => Ok(Depth::Shallow),
            "standard" => Ok(Depth::Standard),
            "deep" => Ok(Depth::Deep),
            "exhaustive" => Ok(Depth::Exhaustive),
            _ => Err(self.error("a depth (shallow|standard|deep|exhaustive)")),
        }
    }

    fn parse_memory_store_kind(&mut self) -> Result<MemoryStoreKind, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "session" => Ok(MemoryStoreKind::Session),
            "persistent" => Ok(MemoryStoreKind::Persistent),
            "ephemeral" => Ok(MemoryStoreKind::Ephemeral),
            _ => Err(self.error("a memory store kind (session|persistent|ephemeral)")),
        }
    }

    fn parse_retrieval_kind(&mut self) -> Result<RetrievalKind, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "semantic" => Ok(RetrievalKind::Semantic),
            "exact" => Ok(RetrievalKind::Exact),
            "hybrid" => Ok(RetrievalKind::Hybrid),
            _ => Err(self.error("a retrieval kind (semantic|exact|hybrid)")),
        }
    }

    fn parse_decay(&mut self) -> Result<Decay, ParseError> {
        if let TokenKind::DurationLiteral { amount, unit } = self.current().kind.clone() {
            self.advance();
            return Ok(Decay::Custom { amount, unit });
        }
        let name = self.expect_identifier()?;
        match name.as_str() {
            "none" => Ok(Decay::None),
            "daily" => Ok(Decay::Daily),
            "weekly" => Ok(Decay::Weekly),
            _ => Err(self.error("a decay policy (none|daily|weekly|<duration>)")),
        }
    }

    fn parse_filter_spec(&mut self) -> Result<FilterSpec, ParseError> {
        let name = self.expect_identifier()?;
        if name == "recent" {
            self.expect_symbol(Symbol::LParen)?;
            let days_field = self.expect_field_name()?;
            if days_field != "days" {
                return Err(self.error_owned(format!("field 'days', found '{days_field}'")));
            }
            self.expect_symbol(Symbol::Colon)?;
            let days = self.expect_integer()?;
            self.expect_symbol(Symbol::RParen)?;
            return Ok(FilterSpec::RecentDays(days));
        }
        Ok(FilterSpec::Named(name))
    }

    fn parse_violation_strategy(&mut self) -> Result<ViolationStrategy, ParseError> {
        match &self.current().kind {
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                Ok(ViolationStrategy::Raise(self.expect_identifier()?))
            }
            TokenKind::Keyword(Keyword::Escalate) => {
                self.advance();
                Ok(ViolationStrategy::Escalate)
            }
            TokenKind::Keyword(Keyword::Fallback) => {
                self.advance();
                self.expect_symbol(Symbol::LParen)?;
                let value = self.expect_string()?;
                self.expect_symbol(Symbol::RParen)?;
                Ok(ViolationStrategy::Fallback(value))
            }
            TokenKind::Identifier(s) if s == "warn" => {
                self.advance();
                Ok(ViolationStrategy::Warn)
            }
            TokenKind::Identifier(s) if s == "log" => {
                self.advance();
                Ok(ViolationStrategy::Log)
            }
            _ => Err(self.error("a violation strategy (raise <Err>|warn|log|escalate|fallback(value))")),
        }
    }

    fn parse_failure_strategy(&mut self) -> Result<(FailureStrategy, Option<String>), ParseError> {
        match &self.current().kind {
            TokenKind::Identifier(s) if s == "log" => {
                self.advance();
                Ok((FailureStrategy::Log, None))
            }
            TokenKind::Keyword(Keyword::Escalate) => {
                self.advance();
                Ok((FailureStrategy::Escalate, None))
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok((FailureStrategy::RaiseNamed, Some(name)))
            }
            TokenKind::Identifier(s) if s == "retry" => {
                self.advance();
                self.expect_symbol(Symbol::LParen)?;
                let backoff_field = self.expect_field_name()?;
                if backoff_field != "backoff" {
                    return Err(self.error_owned(format!("field 'backoff', found '{backoff_field}'")));
                }
                self.expect_symbol(Symbol::Colon)?;
                let spec = self.parse_backoff_spec()?;
                self.expect_symbol(Symbol::RParen)?;
                Ok((FailureStrategy::Retry(spec), None))
            }
            _ => Err(self.error("a failure strategy (log|retry(backoff: ...)|escalate|raise <Err>)")),
        }
    }

    fn parse_effort_level(&mut self) -> Result<EffortLevel, ParseError> {
        let name = self.expect_identifier()?;
        match name.as_str() {
            "low" => Ok(EffortLevel::Low),
            "medium" => Ok(EffortLevel::Medium),
            "high" => Ok(EffortLevel::High),
            "max" => Ok(EffortLevel::Max),
            _ => Err(self.error("an effort level (low|medium|high|max)")),
        }
    }

    fn parse_string_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_symbol(Symbol::LBracket)?;
        let mut items = Vec::new();
        while !self.check_symbol(Symbol::RBracket) {
            items.push(self.expect_string()?);
            self.optional_comma();
        }
        self.expect_symbol(Symbol::RBracket)?;
        Ok(items)
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_symbol(Symbol::LBracket)?;
        let mut items = Vec::new();
        while !self.check_symbol(Symbol::RBracket) {
            items.push(self.expect_identifier()?);
            self.optional_comma();
        }
        self.expect_symbol(Symbol::RBracket)?;
        Ok(items)
    }

    // ========================================================================
    // Token-stream helpers
    // ========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        &self.tokens[self.pos - if self.pos > 0 { 1 } else { 0 }]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn position(&self) -> Position {
        Position::new(self.current().span.line, self.current().span.column)
    }

    fn check_symbol(&self, symbol: Symbol) -> bool {
        matches!(&self.current().kind, TokenKind::Symbol(s) if *s == symbol)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(&self.current().kind, TokenKind::Keyword(k) if *k == keyword)
    }

    fn check_compare(&self, op: CompareOp) -> bool {
        matches!(&self.current().kind, TokenKind::Compare(c) if *c == op)
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> Result<(), ParseError> {
        if self.check_symbol(symbol) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_owned(format!("'{}'", symbol.as_str())))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_owned(format!("'{}'", keyword.as_str())))
        }
    }

    fn expect_compare(&mut self, op: CompareOp) -> Result<(), ParseError> {
        if self.check_compare(op) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_owned(format!("'{}'", op.as_str())))
        }
    }

    fn expect_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        match self.current().kind {
            TokenKind::Compare(op) => {
                self.advance();
                Ok(op)
            }
            _ => Err(self.error("a comparison operator (< > <= >= == !=)")),
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.current().kind.clone() {
            TokenKind::Identifier(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("an identifier")),
        }
    }

    /// Accept a plain identifier, or a keyword that doubles as a field
    /// name in a particular block — e.g. `memory` (a context field and
    /// the top-level `memory` declaration keyword), `on_violation`,
    /// `ask`, `output`, `input`, `refine`, `else`, `where`.
    fn expect_field_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.current().kind {
            TokenKind::Identifier(s) => s.clone(),
            TokenKind::Keyword(Keyword::Memory) => "memory".to_string(),
            TokenKind::Keyword(Keyword::OnViolation) => "on_violation".to_string(),
            TokenKind::Keyword(Keyword::OnExhaustion) => "on_exhaustion".to_string(),
            TokenKind::Keyword(Keyword::Ask) => "ask".to_string(),
            TokenKind::Keyword(Keyword::Output) => "output".to_string(),
            TokenKind::Keyword(Keyword::Input) => "input".to_string(),
            TokenKind::Keyword(Keyword::Refine) => "refine".to_string(),
            TokenKind::Keyword(Keyword::Else) => "else".to_string(),
            TokenKind::Keyword(Keyword::Where) => "where".to_string(),
            _ => return Err(self.error("a field name")),
        };
        self.advance();
        Ok(name)
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.current().kind.clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("a string literal")),
        }
    }

    fn expect_integer(&mut self) -> Result<i64, ParseError> {
        match self.current().kind {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("an integer literal")),
        }
    }

    fn expect_number(&mut self) -> Result<f64, ParseError> {
        match self.current().kind {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(n as f64)
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("a numeric literal")),
        }
    }

    fn expect_bool(&mut self) -> Result<bool, ParseError> {
        match self.current().kind {
            TokenKind::BooleanLiteral(b) => {
                self.advance();
                Ok(b)
            }
            _ => Err(self.error("a boolean literal")),
        }
    }

    fn expect_duration(&mut self) -> Result<(i64, DurationUnit), ParseError> {
        match self.current().kind {
            TokenKind::DurationLiteral { amount, unit } => {
                self.advance();
                Ok((amount, unit))
            }
            _ => Err(self.error("a duration literal (e.g. '30s')")),
        }
    }

    fn optional_comma(&mut self) {
        if self.check_symbol(Symbol::Comma) {
            self.advance();
        }
    }

    fn require_unseen(&self, seen: &mut HashSet<String>, field: &str) -> Result<(), ParseError> {
        if !seen.insert(field.to_string()) {
            return Err(self.error_owned(format!("field '{field}' declared more than once in this block")));
        }
        Ok(())
    }

    fn error(&self, expected: &str) -> ParseError {
        self.error_owned(expected.to_string())
    }

    fn error_owned(&self, expected: String) -> ParseError {
        ParseError {
            expected,
            found: self.current().kind.to_string(),
            position: self.position(),
        }
    }
}

/// Per-step `refine { max_attempts, backoff, pass_failure_context,
/// on_exhaustion }` configuration, built up field-by-field in any order
/// then finalised with documented defaults for whatever was omitted.
#[derive(Default)]
struct RefineConfigBuilder {
    max_attempts: Option<u32>,
    backoff: Option<BackoffSpec>,
    pass_failure_context: Option<bool>,
    on_exhaustion: Option<ExhaustionStrategy>,
}

impl RefineConfigBuilder {
    fn finish(self) -> RefineConfig {
        RefineConfig {
            max_attempts: self.max_attempts.unwrap_or(1),
            backoff: self.backoff.unwrap_or(BackoffSpec::None),
            pass_failure_context: self.pass_failure_context.unwrap_or(true),
            on_exhaustion: self.on_exhaustion.unwrap_or(ExhaustionStrategy::Escalate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_compile_scenario() {
        let source = r#"
            persona P { domain: ["x"] tone: precise }
            flow F() -> String { step S { ask: "hi" output: String } }
            run F() as P
        "#;
        let program = parse(source).expect("minimal program should parse");
        assert_eq!(program.declarations.len(), 2);
        assert_eq!(program.run.len(), 1);
        assert_eq!(program.run[0].flow, "F");
        assert_eq!(program.run[0].persona.as_deref(), Some("P"));
    }

    #[test]
    fn rejects_unknown_persona_field() {
        let source = r#"persona P { nonsense: 1 }"#;
        let err = match parse(source) {
            Err(AxonParseFailure::Parse(e)) => e,
            other => panic!("expected a parse error, got {:?}", other),
        };
        assert!(err.expected.contains("persona field"));
    }

    #[test]
    fn parses_import_with_named_list() {
        let source = "import axon.anchors.{Truthful, Cited}";
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Import(i) => {
                assert_eq!(i.path, vec!["axon", "anchors"]);
                assert_eq!(i.names, Some(vec!["Truthful".to_string(), "Cited".to_string()]));
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn parses_import_without_named_list() {
        let source = "import axon.foo.bar";
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Import(i) => {
                assert_eq!(i.path, vec!["axon", "foo", "bar"]);
                assert_eq!(i.names, None);
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn parses_step_output_reference() {
        let source = r#"
            flow F() -> String {
                step A { ask: "first" output: String }
                step B { ask: "second" input: [A.output] output: String }
            }
            run F() as P
        "#;
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Flow(flow) => match &flow.steps[1] {
                Step::Step(s) => match &s.inputs[0] {
                    InputExpr::StepOutput(r) => {
                        assert_eq!(r.step_name, "A");
                        assert_eq!(r.field, "output");
                    }
                    other => panic!("expected step-output reference, got {:?}", other),
                },
                other => panic!("expected Step, got {:?}", other),
            },
            other => panic!("expected flow, got {:?}", other),
        }
    }

    #[test]
    fn parses_list_and_optional_type_refs() {
        let source = "type R { items: List<FactualClaim> maybe: String? }";
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Type(t) => {
                assert_eq!(t.fields[0].type_ref, TypeRef::List(Box::new(TypeRef::Named("FactualClaim".to_string()))));
                assert_eq!(t.fields[1].type_ref, TypeRef::Optional(Box::new(TypeRef::Named("String".to_string()))));
                assert!(t.fields[1].optional);
            }
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn parses_numeric_range_type() {
        let source = "type Age(0..150)";
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Type(t) => assert_eq!(t.range, Some((0.0, 150.0))),
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn parses_refine_block_on_a_step() {
        let source = r#"
            flow F() -> String {
                validate V {
                    expr: "x"
                    refine { max_attempts: 2 backoff: none pass_failure_context: true on_exhaustion: escalate }
                }
            }
        "#;
        let program = parse(source).unwrap();
        match &program.declarations[0] {
            Declaration::Flow(flow) => match &flow.steps[0] {
                Step::Validate(v) => {
                    let refine = v.refine.as_ref().unwrap();
                    assert_eq!(refine.max_attempts, 2);
                    assert_eq!(refine.backoff, BackoffSpec::None);
                }
                other => panic!("expected Validate, got {:?}", other),
            },
            other => panic!("expected flow, got {:?}", other),
        }
    }

    #[test]
    fn parses_run_statement_clauses_in_any_order() {
        let source = r#"run F(1, "x") effort: high as P constrained_by [A1, A2] within C"#;
        let program = parse(source).unwrap();
        let run = &program.run[0];
        assert_eq!(run.persona.as_deref(), Some("P"));
        assert_eq!(run.context.as_deref(), Some("C"));
        assert_eq!(run.anchors, vec!["A1".to_string(), "A2".to_string()]);
        assert_eq!(run.effort, Some(EffortLevel::High));
    }

    #[test]
    fn parse_stops_at_first_error_without_recovery() {
        let source = "flow F( { }";
        let err = match parse(source) {
            Err(AxonParseFailure::Parse(e)) => e,
            other => panic!("expected parse error, got {:?}", other),
        };
        assert_eq!(err.position.line, 1);
    }
}
